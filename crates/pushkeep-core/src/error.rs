//! Error types for pushkeep-core

use std::fmt::Write;
use thiserror::Error;

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
    /// Optional reference for more details
    pub learn_more: Option<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            alternatives: Vec::new(),
            learn_more: None,
        }
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Add a learn-more reference
    #[must_use]
    pub fn learn_more(mut self, link: impl Into<String>) -> Self {
        self.learn_more = Some(link.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        if let Some(learn_more) = &self.learn_more {
            let _ = writeln!(output, "  Learn more: {learn_more}");
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pushkeep-core
#[derive(Error, Debug)]
pub enum Error {
    /// The user (or the OS) refused notification permission
    #[error("Notification permission was denied")]
    PermissionDenied,

    /// A platform facility this subsystem needs is missing
    #[error("Push notifications are not supported here: {0}")]
    UnsupportedPlatform(String),

    /// The platform only delivers push to installed (home-screen) apps
    #[error("Install the app to the home screen before enabling notifications")]
    InstallRequired,

    /// No background worker registration exists yet
    #[error("Background worker is not registered")]
    WorkerNotRegistered,

    /// No signed-in user to attach the subscription to
    #[error("No signed-in user")]
    NotSignedIn,

    /// A subscription payload failed normalization
    #[error("Malformed subscription payload: {0}")]
    MalformedPayload(String),

    /// The configured application server key is unusable
    #[error("Invalid application server key: {0}")]
    InvalidServerKey(String),

    /// Renewal was triggered before any metadata was cached
    #[error("No renewal metadata cached; renewal skipped")]
    RenewalWithoutMetadata,

    /// Store / relay write failures
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// Relay transport failures
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Illegal lifecycle transition
    #[error("Lifecycle error: {0}")]
    Transition(#[from] crate::state::TransitionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A cross-context channel closed underneath us
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl Error {
    /// One-line message suitable for a toast or status line.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => {
                "Notifications are blocked. Allow them in your device settings to turn them on."
                    .to_string()
            }
            Self::UnsupportedPlatform(_) => {
                "This browser does not support push notifications.".to_string()
            }
            Self::InstallRequired => {
                "Add this app to your Home Screen, then open it from there to enable notifications."
                    .to_string()
            }
            Self::WorkerNotRegistered => {
                "The app is still starting up. Reload the page and try again.".to_string()
            }
            Self::NotSignedIn => "Sign in to enable notifications.".to_string(),
            Self::MalformedPayload(_) | Self::InvalidServerKey(_) | Self::Config(_) => {
                "Notifications could not be set up on this device.".to_string()
            }
            Self::Persistence(_) | Self::Relay(_) => {
                "Could not save your notification settings. Check your connection and try again."
                    .to_string()
            }
            _ => "Something went wrong while setting up notifications.".to_string(),
        }
    }

    /// True for failures that the user can only resolve outside the app.
    #[must_use]
    pub fn is_terminal_for_attempt(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::UnsupportedPlatform(_) | Self::InstallRequired
        )
    }

    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::PermissionDenied => Some(
                Remediation::new("Re-enable notifications for this app in the OS settings.")
                    .alternative(
                        "On iOS: Settings > Notifications > (app name) > Allow Notifications.",
                    ),
            ),
            Self::UnsupportedPlatform(_) => Some(
                Remediation::new("Use a browser with Push API and Notification API support.")
                    .learn_more("https://developer.mozilla.org/docs/Web/API/Push_API"),
            ),
            Self::InstallRequired => Some(
                Remediation::new("Use Share > Add to Home Screen, then launch the installed app.")
                    .alternative("Push on iOS requires iOS 16.4 or newer."),
            ),
            Self::WorkerNotRegistered => Some(Remediation::new(
                "Register the background worker before requesting a subscription.",
            )),
            Self::InvalidServerKey(_) => Some(
                Remediation::new("Set push.vapid_public_key to the URL-safe base64 public key.")
                    .alternative("The decoded key must be a 65-byte uncompressed P-256 point."),
            ),
            Self::Persistence(err) => Some(err.remediation()),
            Self::Relay(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            _ => None,
        }
    }
}

/// Document store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Unavailable(_) => Remediation::new("The store could not be reached. Retry later.")
                .alternative("Check network connectivity from this device."),
            Self::InvalidPath(_) => {
                Remediation::new("Document paths must not contain empty segments.")
            }
            Self::Io(_) => Remediation::new("Check permissions on the worker storage directory."),
            Self::Corrupt(_) => {
                Remediation::new("Delete the corrupt entry; it is rewritten on next use.")
            }
        }
    }
}

/// HTTP relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Relay request failed: {0}")]
    Transport(String),

    #[error("Relay returned HTTP {status}")]
    Status { status: u16 },

    #[error("Relay request body is invalid: {0}")]
    InvalidRequest(String),
}

impl RelayError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Transport(_) => {
                Remediation::new("Check push.relay_url and network reachability.")
            }
            Self::Status { status } => Remediation::new(format!(
                "The relay answered {status}; inspect the relay logs for the rejected request."
            )),
            Self::InvalidRequest(_) => Remediation::new(
                "Relay bodies need userId and a subscription with endpoint and keys.",
            ),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config: {0}")]
    ReadFailed(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config value: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => {
                Remediation::new(format!("Create the config file or pass another path: {path}"))
            }
            Self::ReadFailed(_) => Remediation::new("Check that the config file is readable."),
            Self::ParseError(_) => Remediation::new("Fix the TOML syntax and retry.")
                .learn_more("https://toml.io/en/v1.0.0"),
            Self::ValidationError(_) => Remediation::new("Correct the value named in the error."),
        }
    }
}

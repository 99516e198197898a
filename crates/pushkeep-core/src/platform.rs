//! Platform detection from the user agent and display mode.
//!
//! iOS and iPadOS only deliver web push to apps launched from the Home
//! Screen, and every browser there is a WebKit shell. Callers use
//! [`PlatformInfo`] to gate the permission prompt and to tag persisted
//! records for diagnostics.

use serde::{Deserialize, Serialize};

/// Diagnostic flags stored alongside each subscription record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFlags {
    #[serde(rename = "isIOSSafari")]
    pub is_ios_safari: bool,
}

/// Result of platform detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// iOS / iPadOS WebKit (Safari or any in-app shell on that engine).
    pub is_target_browser_engine: bool,
    /// Launched from the Home Screen (`display-mode: standalone`).
    pub is_standalone_installed: bool,
}

impl PlatformInfo {
    /// The platform requires installation before the permission prompt is worth showing.
    #[must_use]
    pub fn requires_install_before_prompt(&self) -> bool {
        self.is_target_browser_engine && !self.is_standalone_installed
    }

    /// Whether notifications may ask to stay on screen until dismissed.
    #[must_use]
    pub fn supports_require_interaction(&self) -> bool {
        !self.is_target_browser_engine
    }

    #[must_use]
    pub fn flags(&self) -> PlatformFlags {
        PlatformFlags {
            is_ios_safari: self.is_target_browser_engine,
        }
    }
}

const IOS_DEVICE_TOKENS: [&str; 3] = ["iphone", "ipad", "ipod"];

/// Detect the platform. `standalone` is the result of the
/// `(display-mode: standalone)` media query (or `navigator.standalone`).
#[must_use]
pub fn detect(user_agent: &str, standalone: bool) -> PlatformInfo {
    PlatformInfo {
        is_target_browser_engine: is_ios_webkit(user_agent),
        is_standalone_installed: standalone,
    }
}

fn is_ios_webkit(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    if !ua.contains("applewebkit") {
        return false;
    }
    if IOS_DEVICE_TOKENS.iter().any(|token| ua.contains(token)) {
        return true;
    }
    // iPadOS 13+ requests the desktop site and reports itself as a Mac; the
    // mobile build token still gives it away.
    ua.contains("macintosh") && ua.contains("mobile/")
}

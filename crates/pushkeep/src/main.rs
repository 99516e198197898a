//! pushkeep - web push subscription lifecycle CLI
//!
//! Operator tooling over `pushkeep-core`: platform detection, subscription
//! normalization, document keys, server key checks, relay submission and a
//! simulated end-to-end lifecycle.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use pushkeep_core::config::Config;
use pushkeep_core::gateway::{PersistenceGateway, RecordContext};
use pushkeep_core::logging::init_logging;
use pushkeep_core::platform::{PlatformFlags, detect};
use pushkeep_core::relay::{RelayClient, RelayRequest};
use pushkeep_core::subscription::normalize_str;
use pushkeep_core::vapid::{ApplicationServerKey, P256_UNCOMPRESSED_LEN};

mod simulate;

/// pushkeep - web push subscription lifecycle
#[derive(Parser, Debug)]
#[command(name = "pushkeep")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: <config dir>/pushkeep/pushkeep.toml)
    #[arg(short, long, global = true, env = "PUSHKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a user agent and display mode
    Detect {
        /// User-Agent header value
        #[arg(long)]
        user_agent: String,

        /// The app was launched from the Home Screen
        #[arg(long)]
        standalone: bool,
    },

    /// Normalize a serialized subscription (file, or `-` for stdin)
    Normalize {
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print the document key for an endpoint
    Key {
        endpoint: String,

        /// Also print the full document path for this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Validate an application server key (defaults to push.vapid_public_key)
    ServerKey { key: Option<String> },

    /// Submit a renewal write to the configured relay
    Relay {
        /// Subscription JSON file (or `-` for stdin)
        input: String,

        /// Owner of the subscription
        #[arg(long)]
        user: String,

        /// Superseded endpoint to delete
        #[arg(long)]
        old_endpoint: Option<String>,

        /// Relay URL (overrides push.relay_url)
        #[arg(long)]
        url: Option<String>,
    },

    /// Run enable, rotation, delivery and opt-out against in-process fakes
    Simulate {
        /// Answer the permission prompt with "denied"
        #[arg(long)]
        deny: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading default config")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("reading stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {input}"))
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        if let Some(remediation) = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<pushkeep_core::Error>())
            .and_then(pushkeep_core::Error::remediation)
        {
            eprint!("{}", remediation.render_plain());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging).context("initializing logging")?;
    tracing::debug!(command = ?cli.command, json = cli.json, "running command");

    match cli.command {
        Commands::Detect {
            user_agent,
            standalone,
        } => {
            let info = detect(&user_agent, standalone);
            if cli.json {
                print_json(&json!({
                    "isTargetBrowserEngine": info.is_target_browser_engine,
                    "isStandaloneInstalled": info.is_standalone_installed,
                    "requiresInstall": info.requires_install_before_prompt(),
                    "supportsRequireInteraction": info.supports_require_interaction(),
                }))?;
            } else {
                println!("target engine:      {}", info.is_target_browser_engine);
                println!("standalone:         {}", info.is_standalone_installed);
                println!("requires install:   {}", info.requires_install_before_prompt());
            }
        }
        Commands::Normalize { input } => {
            let raw = read_input(&input)?;
            let Some(subscription) = normalize_str(&raw) else {
                bail!(
                    "not a complete subscription: endpoint, keys.auth and keys.p256dh are required"
                );
            };
            if cli.json {
                print_json(&subscription.to_json())?;
            } else {
                println!("endpoint: {}", subscription.endpoint());
                println!("auth:     present");
                println!("p256dh:   present");
                if let Some(expiration) = subscription.expiration_time() {
                    println!("expires:  {expiration}");
                }
            }
        }
        Commands::Key { endpoint, user } => {
            let key = pushkeep_core::identity::sanitize_endpoint(&endpoint);
            let path = user
                .as_deref()
                .map(|user| PersistenceGateway::document_path(user, &endpoint))
                .transpose()?;
            if cli.json {
                print_json(&json!({
                    "key": key,
                    "path": path.as_ref().map(ToString::to_string),
                }))?;
            } else if let Some(path) = path {
                println!("{path}");
            } else {
                println!("{key}");
            }
        }
        Commands::ServerKey { key } => {
            let encoded = match key {
                Some(key) => key,
                None if !config.push.vapid_public_key.is_empty() => config.push.vapid_public_key,
                None => bail!("no key given and push.vapid_public_key is not set"),
            };
            let key = ApplicationServerKey::from_base64url(&encoded)?;
            if cli.json {
                print_json(&json!({
                    "valid": true,
                    "bytes": key.as_bytes().len(),
                    "canonical": key.to_base64url(),
                }))?;
            } else {
                println!("valid P-256 public key ({P256_UNCOMPRESSED_LEN} bytes)");
                println!("{}", key.to_base64url());
            }
        }
        Commands::Relay {
            input,
            user,
            old_endpoint,
            url,
        } => {
            let raw = read_input(&input)?;
            let subscription = normalize_str(&raw)
                .context("subscription is missing endpoint or keys; nothing was sent")?;
            let Some(url) = url.or(config.push.relay_url.clone()) else {
                bail!("no relay URL: pass --url or set push.relay_url");
            };
            let client = RelayClient::new(&url, config.push.relay_timeout())?;
            let context = RecordContext {
                platform_flags: PlatformFlags::default(),
                user_agent: format!("pushkeep/{}", pushkeep_core::VERSION),
            };
            let request =
                RelayRequest::new(&user, &subscription, &context, old_endpoint.as_deref());
            let outcome = client
                .submit(&request)
                .await
                .with_context(|| format!("submitting to {url}"))?;
            if cli.json {
                print_json(&json!({
                    "endpoint": subscription.endpoint(),
                    "oldRemoved": outcome.old_removed,
                }))?;
            } else {
                println!("stored {}", subscription.endpoint());
                if !outcome.old_removed {
                    println!("warning: the superseded record was not removed");
                }
            }
        }
        Commands::Simulate { deny } => {
            let transcript = simulate::run(&config, deny).await?;
            if cli.json {
                print_json(&serde_json::to_value(&transcript)?)?;
            } else {
                for step in &transcript {
                    println!("{:<10} {}", step.step, step.detail);
                }
            }
        }
    }
    Ok(())
}

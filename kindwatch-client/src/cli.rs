use std::path::PathBuf;

use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Config resolution order:
  1) --config/-c PATH
  2) $KINDWATCH_CONFIG
  3) XDG default: ~/.config/kindwatch/client.yaml
"#;

#[derive(Debug, Parser)]
#[command(
    name = "kindwatch-client",
    version,
    about = "Parent console for KindWatch",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in to the server and save the token in the keyring
    Login {
        /// Server URL (e.g., http://127.0.0.1:5151). Falls back to config or prompt.
        #[arg(long)]
        server: Option<String>,
        /// Username. Falls back to prompt.
        #[arg(long)]
        username: Option<String>,
    },
    /// Request a pairing code and wait for a child device to redeem it
    Pair {
        /// Display name for the new device
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a paired device and everything it reported
    Unpair {
        /// Device id (see `devices`)
        device_id: String,
    },
    /// List paired devices
    Devices,
    /// Watch a device: apps, location, web history, settings, zones
    Dashboard {
        /// Device id; defaults to the first paired device
        #[arg(long)]
        device: Option<String>,
        /// Refresh once and exit
        #[arg(long)]
        once: bool,
    },
}

use kindwatch_shared::api::rest::RestError;
use tracing::info;

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod login;
pub mod pairing;
pub mod sse;

pub use cli::{Cli, Command};
pub use config::{ClientConfig, load_config, resolve_config_path};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("session expired; run `kindwatch-client login` again")]
    AuthExpired,
}

impl From<RestError> for AppError {
    fn from(e: RestError) -> Self {
        if e.is_auth_fatal() {
            AppError::AuthExpired
        } else {
            AppError::Http(e.to_string())
        }
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn keyring_entry(server_url: &str) -> Result<keyring::Entry, AppError> {
    let service = "kindwatch-client";
    keyring::Entry::new(service, &config::normalize_server_url(server_url))
        .map_err(|e| AppError::Keyring(e.to_string()))
}

fn read_token_from_keyring(server_url: &str) -> Result<String, AppError> {
    let entry = keyring_entry(server_url)?;
    entry
        .get_password()
        .map_err(|_| AppError::Config("no saved token; run `kindwatch-client login` first".into()))
}

/// Load config and the saved parent token for authenticated commands.
fn load_session(cfg_path: Option<std::path::PathBuf>) -> Result<(ClientConfig, String), AppError> {
    let (path, cfg) = ClientConfig::find_and_load(cfg_path)?;
    info!(path=?path, "loaded config");
    let token = read_token_from_keyring(&cfg.server_url)?;
    Ok((cfg, token))
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    init_tracing();

    match cli.command {
        Command::Login { server, username } => login::login(server, username, cli.config).await,
        Command::Pair { name } => {
            let (cfg, token) = load_session(cli.config)?;
            pairing::pair(&cfg, &token, name).await
        }
        Command::Unpair { device_id } => {
            let (cfg, token) = load_session(cli.config)?;
            pairing::unpair(&cfg, &token, &device_id).await
        }
        Command::Devices => {
            let (cfg, token) = load_session(cli.config)?;
            let base = config::normalize_server_url(&cfg.server_url);
            let devices = kindwatch_shared::api::rest::list_devices(&base, &token).await?;
            if devices.is_empty() {
                println!("No paired devices. Run `kindwatch-client pair` to add one.");
                return Ok(());
            }
            for d in devices {
                println!(
                    "{}  {}  last seen: {}",
                    d.id,
                    d.name,
                    d.last_seen_at.as_deref().unwrap_or("never")
                );
            }
            Ok(())
        }
        Command::Dashboard { device, once } => {
            let (cfg, token) = load_session(cli.config)?;
            dashboard::run(&cfg, &token, device, once).await
        }
    }
}

pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {
                info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown: received Ctrl+C");
    }
}

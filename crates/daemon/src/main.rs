//! File-drop Daemon
//!
//! Single-user file upload server.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use filedrop_daemon::config::{default_config_path, Config};
use filedrop_daemon::server::{DropServer, ServerConfig, ServerEvent, ServerState};
use filedrop_daemon::{keys, systemd};
use protocol::{compute_digest, Credential, HostIdentity};
use tracing_subscriber::EnvFilter;

/// File-drop daemon - upload-only file server with per-session ownership.
#[derive(Parser, Debug)]
#[command(name = "filedrop")]
#[command(version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the server
    Serve(ServeArgs),

    /// Print the credential digest for a username and password
    Hash {
        /// Username
        #[arg(long)]
        user: String,

        /// Plaintext password
        #[arg(long)]
        password: String,
    },

    /// Print a fresh host key pair as PEM
    Generate,

    /// Print the effective configuration
    Config,
}

/// Options of the `serve` command. Each overrides the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Data root every client path is confined to
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR", conflicts_with = "socket")]
    pub endpoint: Option<String>,

    /// Use the listening socket passed in by systemd
    #[arg(long)]
    pub socket: bool,

    /// Host private key path, or `-` to read PEM from stdin
    #[arg(long, value_name = "PATH")]
    pub hostkey: Option<PathBuf>,

    /// The single username allowed to log in
    #[arg(long)]
    pub user: Option<String>,

    /// Plaintext password
    #[arg(long, conflicts_with = "password_hash")]
    pub password: Option<String>,

    /// Hex digest as printed by `filedrop hash`
    #[arg(long, value_name = "HEX")]
    pub password_hash: Option<String>,

    /// Exit once idle after the last connection closes
    #[arg(long)]
    pub exit: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.root {
            config.storage.root = root.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.server.endpoint = endpoint.clone();
            config.server.socket_activation = false;
        }
        if self.socket {
            config.server.socket_activation = true;
        }
        if let Some(hostkey) = &self.hostkey {
            config.keys.host_key = hostkey.clone();
        }
        if let Some(user) = &self.user {
            config.auth.username = Some(user.clone());
        }
        if let Some(hash) = &self.password_hash {
            config.auth.password_hash = Some(hash.clone());
        }
        if self.exit {
            config.server.exit_when_idle = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    // Initialize tracing
    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Commands::Serve(cli.serve)) {
        Commands::Serve(args) => serve(args, config).await,
        Commands::Hash { user, password } => {
            filedrop_daemon::config::validate_username(&user)?;
            println!("{}", hex::encode(compute_digest(&user, &password)));
            Ok(())
        }
        Commands::Generate => {
            let pem = HostIdentity::generate()
                .to_pem()
                .context("Failed to encode generated key")?;
            print!("{}", pem.private_pem);
            print!("{}", pem.public_pem);
            Ok(())
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Runs the server until a shutdown signal or an idle exit.
async fn serve(args: ServeArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let credential = credential(&args, &config)?;
    let host_key = keys::load_or_create_host_key(&config.keys.host_key).with_context(|| {
        format!(
            "Failed to load host key from {}",
            config.keys.host_key.display()
        )
    })?;

    let server = DropServer::new(ServerConfig::from_config(&config, credential, host_key))
        .context("Failed to start server")?;

    let listener = if config.server.socket_activation {
        let mut listeners = systemd::listen_fds().context("Failed to adopt inherited sockets")?;
        if listeners.is_empty() {
            bail!("Socket activation requested but no socket was passed in");
        }
        if listeners.len() > 1 {
            tracing::warn!(
                count = listeners.len(),
                "Several sockets passed in, using the first"
            );
        }
        listeners.swap_remove(0)
    } else {
        std::net::TcpListener::bind(&config.server.endpoint)
            .with_context(|| format!("Failed to listen on {}", config.server.endpoint))?
    };

    let mut events = server.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServerEvent::StateChanged(state) => {
                    let status = match state {
                        ServerState::Idle => "Idle",
                        ServerState::Serving => "Serving",
                        ServerState::Stopping => "Stopping",
                        ServerState::Stopped => "Stopped",
                    };
                    systemd::notify_status(status);
                }
                ServerEvent::ConnectionClosed { remaining, .. } => {
                    systemd::notify_status(&format!("{} active connections", remaining));
                }
                _ => {}
            }
        }
    });

    let mut serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve_std(listener).await }
    });
    systemd::notify_ready();

    tokio::select! {
        result = &mut serving => {
            // Idle exit: the server closed itself.
            systemd::notify_stopping();
            result.context("Server task failed")??;
        }
        signal = systemd::wait_for_shutdown_signal() => {
            signal.context("Failed to install signal handlers")?;
            systemd::notify_stopping();
            server.close().await;
            serving.await.context("Server task failed")??;
        }
    }

    tracing::info!("File-drop daemon exiting");
    Ok(())
}

/// Builds the credential. A plaintext password on the command line wins over
/// any configured digest.
fn credential(args: &ServeArgs, config: &Config) -> anyhow::Result<Credential> {
    let Some(username) = config.auth.username.as_deref() else {
        bail!("A username is required (--user or [auth] username)");
    };

    match (&args.password, &config.auth.password_hash) {
        (Some(password), _) => Ok(Credential::from_password(username, password)),
        (None, Some(hash)) => {
            Credential::from_hex_digest(username, hash).context("Invalid password hash")
        }
        (None, None) => bail!("A password is required (--password or --password-hash)"),
    }
}

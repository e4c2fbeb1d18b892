use std::io::{self, BufRead, IsTerminal};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, error, info, warn};
use tokio::net::TcpListener;

use homelink::api::{self, AppState};
use homelink::auth::ConfiguredCredentials;
use homelink::db::Database;
use homelink::face::EuclideanComparator;
use homelink::liveness::LivenessMonitor;
use homelink::registry::SessionRegistry;
use homelink::settings::{self, APP_NAME, AppConfig};
use homelink::state::{MemoryStore, SqliteStore, StateCache, StateStore};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "homelink - smart-home hub gateway server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalOpts {
    /// Config file (or a directory holding config.toml)
    #[arg(long, value_name = "PATH", global = true, env = "HOMELINK_CONFIG")]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// More logging; -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
    /// Report what init/config reset would write without touching disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept hub connections and serve the HTTP API
    Serve(ServeCommand),
    /// Write the default config and create the hub database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print a bcrypt hash for an `[[auth.users]]` entry
    HashPassword {
        /// Password to hash; read from stdin when omitted
        password: Option<String>,
        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Bind address (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Listen port (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
    /// Keep hub state in memory; nothing survives a restart
    #[arg(long)]
    ephemeral: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration with password hashes redacted
    Show {
        #[arg(long, value_enum, default_value_t = ConfigFormat::Toml)]
        format: ConfigFormat,
    },
    /// Print the config file and database locations
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

/// Where homelink keeps its files.
#[derive(Debug, Clone)]
struct Paths {
    config_file: PathBuf,
    data_dir: PathBuf,
}

impl Paths {
    fn resolve(config: Option<&Path>) -> Result<Self> {
        let config_file = match config {
            Some(path) => {
                let path = match path.to_str() {
                    Some(text) => settings::expand_str_path(text)?,
                    None => path.to_path_buf(),
                };
                if path.is_dir() {
                    path.join("config.toml")
                } else {
                    path
                }
            }
            None => dirs::config_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
                .ok_or_else(|| anyhow!("unable to determine configuration directory"))?
                .join(APP_NAME)
                .join("config.toml"),
        };

        let data_dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
            .ok_or_else(|| anyhow!("unable to determine data directory"))?
            .join(APP_NAME);

        Ok(Self {
            config_file,
            data_dir,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.global);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let global = cli.global;
    let paths = || Paths::resolve(global.config.as_deref());

    match cli.command {
        Command::HashPassword { password, cost } => hash_password(password, cost),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), APP_NAME, &mut io::stdout());
            Ok(())
        }
        Command::Serve(cmd) => {
            let paths = paths()?;
            if !paths.config_file.exists() {
                warn!(
                    "No config at {}; using defaults (run `homelink init` to create one)",
                    paths.config_file.display()
                );
            }
            let config = AppConfig::load(&paths.config_file)?;
            serve(&config, &paths, cmd).await
        }
        Command::Init { force } => init(&paths()?, force, global.dry_run).await,
        Command::Config { command } => config_command(&paths()?, command, global.dry_run),
    }
}

fn init_logging(global: &GlobalOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match (global.quiet, global.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    let directive = level.to_string().to_lowercase();

    // tracing carries the HTTP layer.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("homelink={directive},tower_http={directive}")));
    let registry = tracing_subscriber::registry().with(filter);
    let initialized = match global.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(!global.no_color && io::stderr().is_terminal()),
            )
            .try_init(),
    };
    if let Err(e) = initialized {
        eprintln!("warning: tracing subscriber already installed: {e}");
    }

    // Library modules log through the `log` facade.
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .write_style(if global.no_color {
            env_logger::WriteStyle::Never
        } else {
            env_logger::WriteStyle::Auto
        })
        .try_init()
        .ok();
}

async fn serve(config: &AppConfig, paths: &Paths, cmd: ServeCommand) -> Result<()> {
    let store: Arc<dyn StateStore> = if cmd.ephemeral {
        warn!("Ephemeral mode: hub state is lost on shutdown");
        Arc::new(MemoryStore::new())
    } else {
        let db_path = config.database_path(&paths.data_dir)?;
        let database = Database::open(&db_path, &config.database).await?;
        Arc::new(SqliteStore::new(&database))
    };

    let cache = Arc::new(StateCache::load(store).await.context("loading hub state")?);
    let credentials = Arc::new(ConfiguredCredentials::new(&config.auth));
    let comparator = Arc::new(EuclideanComparator::new(config.face.tolerance));
    let state = AppState::new(&config.registry, cache.clone(), credentials, comparator);
    let registry = state.registry.clone();

    let liveness = LivenessMonitor::new(cache, config.liveness.clone()).start();

    let host = cmd.host.as_deref().unwrap_or(&config.server.host);
    let port = cmd.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        "Hub channel on ws://{addr}/hub-channel/{{hub_id}}, {} hub user(s) configured",
        config.auth.users.len()
    );

    let served = axum::serve(listener, api::create_router(state))
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .context("running server");

    liveness.stop().await;
    served?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, then close every hub session so their
/// sockets drain and the server can finish.
async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Closing {} hub session(s)", registry.len());
    registry.close_all();
}

async fn init(paths: &Paths, force: bool, dry_run: bool) -> Result<()> {
    let config_exists = paths.config_file.exists();
    if config_exists && !force {
        bail!(
            "config already exists at {} (use --force to overwrite)",
            paths.config_file.display()
        );
    }

    if dry_run {
        println!("would write {}", paths.config_file.display());
    } else {
        settings::write_default_config(&paths.config_file)?;
        println!("wrote {}", paths.config_file.display());
    }

    let config = AppConfig::load(&paths.config_file)?;
    let db_path = config.database_path(&paths.data_dir)?;
    if dry_run {
        println!("would create {}", db_path.display());
        return Ok(());
    }
    let database = Database::open(&db_path, &config.database).await?;
    database.close().await;
    println!("database ready at {}", db_path.display());
    println!("next: add a hub user with `homelink hash-password`");
    Ok(())
}

fn config_command(paths: &Paths, command: ConfigCommand, dry_run: bool) -> Result<()> {
    match command {
        ConfigCommand::Show { format } => {
            let config = redacted(AppConfig::load(&paths.config_file)?);
            let text = match format {
                ConfigFormat::Toml => toml::to_string_pretty(&config)?,
                ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
                ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
            };
            println!("{text}");
        }
        ConfigCommand::Path => {
            let config = AppConfig::load(&paths.config_file)?;
            println!("config:   {}", paths.config_file.display());
            println!(
                "database: {}",
                config.database_path(&paths.data_dir)?.display()
            );
        }
        ConfigCommand::Reset if dry_run => {
            println!("would reset {}", paths.config_file.display());
        }
        ConfigCommand::Reset => {
            settings::write_default_config(&paths.config_file)?;
            println!("reset {}", paths.config_file.display());
        }
    }
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    for user in &mut config.auth.users {
        user.password_hash = "<redacted>".to_string();
    }
    config
}

fn hash_password(password: Option<String>, cost: u32) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("reading password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        bail!("password must not be empty");
    }

    let hash = bcrypt::hash(&password, cost).context("hashing password")?;
    println!("{hash}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use homelink::auth::HubUser;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_flags() {
        let cli = Cli::parse_from(["homelink", "-v", "serve", "--port", "9000", "--ephemeral"]);
        assert_eq!(cli.global.verbose, 1);
        match cli.command {
            Command::Serve(cmd) => {
                assert_eq!(cmd.port, Some(9000));
                assert!(cmd.ephemeral);
                assert!(cmd.host.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_config_show_hides_password_hashes() {
        let mut config = AppConfig::default();
        config.auth.users.push(HubUser {
            username: "alice".to_string(),
            user_id: "user-1".to_string(),
            password_hash: "$2b$04$secret".to_string(),
        });

        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(shown.contains("<redacted>"));
        assert!(!shown.contains("secret"));
    }
}

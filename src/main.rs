//! Binary entrypoint for the meshrelay CLI.
//!
//! Commands:
//! - `start` - run the relay until interrupted
//! - `check` - one-shot reachability check of radio, store and hub; prints JSON
//! - `init` - write a starter `meshrelay.toml`
//!
//! Settings come from the config file (`-c`), then from the environment
//! (`MESHTASTIC_HOSTNAME`, `WS_HUB_SERVER`, `API_URL`, `NODE_ID`, `ACK_URL`),
//! with a `.env` file in the working directory loaded first.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::time::Duration;

use meshrelay::config::Config;
use meshrelay::hub::SocketIoHub;
use meshrelay::meshtastic::{TcpRadio, TextEvent};
use meshrelay::relay::{build_orchestrator, startup_policy, HubLink, MessageStore};
use meshrelay::store::HttpStore;

#[derive(Parser)]
#[command(name = "meshrelay")]
#[command(about = "Relay text messages between a Meshtastic mesh, a Socket.IO hub and an HTTP message store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "meshrelay.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Start,
    /// Check that radio, store and hub are reachable, print a JSON summary
    Check,
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(&cli.config).await;
            init_logging(config.as_ref().ok(), cli.verbose);
            let config = config.map_err(|e| {
                error!("{}", e);
                e
            })?;
            info!("Starting meshrelay v{}", env!("CARGO_PKG_VERSION"));

            let mut relay = match build_orchestrator(&config) {
                Ok(r) => r,
                Err(e) => {
                    error!("Startup failed: {}", e);
                    return Err(e.into());
                }
            };
            if let Err(e) = relay.start(startup_policy(&config)).await {
                error!("Startup failed: {}", e);
                return Err(e.into());
            }
            relay
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        Commands::Check => {
            let config = load_config(&cli.config).await;
            init_logging(config.as_ref().ok(), cli.verbose);
            let config = config?;
            let (payload, ok) = check(&config).await;
            println!("{}", payload);
            if !ok {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Init { force } => {
            init_logging(None, cli.verbose);
            if !force && std::path::Path::new(&cli.config).exists() {
                warn!("{} already exists; use --force to overwrite", cli.config);
                return Ok(ExitCode::FAILURE);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn load_config(path: &str) -> Result<Config> {
    let mut config = Config::load_or_default(path).await?;
    config.apply_env();
    Ok(config)
}

/// Probe every dependency once. Returns the JSON summary and overall status.
async fn check(config: &Config) -> (serde_json::Value, bool) {
    if let Err(e) = config.validate() {
        return (
            serde_json::json!({ "status": "invalid_config", "error": e.to_string() }),
            false,
        );
    }

    let host = config.radio.hostname.as_str();
    let radio_reachable = config.radio.probe.reachable(host).await;
    let ignore: Arc<dyn Fn(TextEvent) + Send + Sync> = Arc::new(|_ev: TextEvent| {});
    let radio_session = match TcpRadio::connect(
        host,
        ignore,
        Duration::from_secs(config.radio.connect_timeout_secs),
        Duration::from_secs(config.radio.heartbeat_secs),
    )
    .await
    {
        Ok(mut radio) => {
            radio.close().await;
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    };

    let store = match HttpStore::new(
        config.store.api_url.clone(),
        config.ack_url().to_string(),
        Duration::from_secs(config.store.request_timeout_secs),
    ) {
        Ok(store) => store.fetch_pending().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let hub = match SocketIoHub::connect(
        &config.hub.server,
        Duration::from_secs(config.hub.handshake_timeout_secs),
    )
    .await
    {
        Ok(hub) => {
            let sid = hub.sid().map(str::to_string);
            hub.close().await;
            Ok(sid)
        }
        Err(e) => Err(e.to_string()),
    };

    let ok = radio_session.is_ok() && store.is_ok() && hub.is_ok();
    let payload = serde_json::json!({
        "status": if ok { "ok" } else { "degraded" },
        "radio": {
            "host": host,
            "probe": config.radio.probe,
            "reachable": radio_reachable,
            "session": radio_session.err().unwrap_or_else(|| "ok".to_string()),
        },
        "store": match &store {
            Ok(pending) => serde_json::json!({
                "status": "ok",
                "pending": pending.iter().filter(|m| !m.message_sent).count(),
            }),
            Err(e) => serde_json::json!({ "status": e }),
        },
        "hub": match &hub {
            Ok(sid) => serde_json::json!({ "status": "ok", "sid": sid }),
            Err(e) => serde_json::json!({ "status": e }),
        },
    });
    (payload, ok)
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(f) = log_file {
        let file = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Only echo to the console in the foreground
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

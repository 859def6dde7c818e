use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use pulsehearth::Config;
use pulsehearth::ConfigEntries;
use pulsehearth::ConfigError;
use pulsehearth::Engine;
use pulsehearth::EntryMap;
use pulsehearth::render_diagnostics;
use pulsehearth_client::ServiceHost;
use pulsehearth_client::SidecarConnector;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_CONFIG_PATH: &str = "pulsehearth.toml";

#[derive(Parser, Debug)]
#[command(name = "pulsehearth", version, about = "ADT Pulse hub daemon")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every config entry and serve the HTTP API until Ctrl+C
    Run,

    /// Validate ADT Pulse credentials and store a new config entry
    Setup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Device fingerprint from the ADT Pulse web portal
        #[arg(long)]
        fingerprint: String,
        /// Portal region: us, ca or a portal URL
        #[arg(long, default_value = "us")]
        host: ServiceHost,
    },

    /// Change polling and session options of an entry
    Options {
        entry_id: String,
        /// Seconds between polls
        #[arg(long)]
        scan_interval: Option<f64>,
        /// Minutes between keepalives
        #[arg(long)]
        keepalive_interval: Option<u32>,
        /// Minutes between forced re-logins
        #[arg(long)]
        relogin_interval: Option<u32>,
    },

    /// List stored config entries
    Entries,

    /// Delete a config entry
    Remove { entry_id: String },

    /// Check the config file and print diagnostics
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::CheckConfig = cli.command {
        return check_config(&cli.config);
    }

    let config = load_config(&cli.config)?;
    init_tracing(&config);

    match cli.command {
        Command::Run => run(config).await,
        Command::Setup {
            username,
            password,
            fingerprint,
            host,
        } => {
            let mut input = EntryMap::new();
            input.insert("username".into(), username.into());
            input.insert("password".into(), password.into());
            input.insert("fingerprint".into(), fingerprint.into());
            input.insert(
                "hostname".into(),
                serde_json::to_value(host).context("Failed to encode portal host")?,
            );

            let engine = offline_engine(&config).await?;
            let entry = engine
                .create_entry("adtpulse", &input)
                .await
                .context("Setup failed")?;
            println!("Created entry {} ({})", entry.entry_id, entry.title);
            Ok(())
        }
        Command::Options {
            entry_id,
            scan_interval,
            keepalive_interval,
            relogin_interval,
        } => {
            let mut input = EntryMap::new();
            if let Some(v) = scan_interval {
                input.insert("scan_interval".into(), v.into());
            }
            if let Some(v) = keepalive_interval {
                input.insert("keepalive_interval".into(), v.into());
            }
            if let Some(v) = relogin_interval {
                input.insert("relogin_interval".into(), v.into());
            }

            let engine = offline_engine(&config).await?;
            let entry = engine
                .update_options(&entry_id, &input)
                .await
                .context("Options update failed")?;
            println!(
                "Options for {}: {}",
                entry.entry_id,
                serde_json::Value::Object(entry.options)
            );
            Ok(())
        }
        Command::Entries => {
            let engine = offline_engine(&config).await?;
            for entry in engine.entries() {
                println!(
                    "{}  {}  {}  ({})",
                    entry.entry_id,
                    entry.domain,
                    entry.title,
                    entry.unique_id.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Command::Remove { entry_id } => {
            let engine = offline_engine(&config).await?;
            let entry = engine
                .remove_entry(&entry_id)
                .await
                .context("Remove failed")?;
            println!("Removed entry {} ({})", entry.entry_id, entry.title);
            Ok(())
        }
        Command::CheckConfig => Ok(()),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let (config, diagnostics) = match Config::from_file(path) {
        Ok(loaded) => loaded,
        Err(ConfigError::Invalid(rendered)) => {
            eprintln!("{}", rendered);
            anyhow::bail!("Invalid config file {}", path.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load {}", path.display()));
        }
    };
    if !diagnostics.is_empty() {
        eprintln!("{}", render_diagnostics(&diagnostics, true));
    }
    Ok(config)
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{} is valid", path.display());
    println!("  log level: {:?}", config.logging.level);
    if config.api.enabled {
        println!("  api: {}:{}", config.api.listen, config.api.port);
    } else {
        println!("  api: disabled");
    }
    println!("  entries: {}", config.storage.entries_file().display());
    println!(
        "  sidecar: {} {}",
        config.sidecar.python_path.display(),
        config.sidecar.script_path.display()
    );
    Ok(())
}

fn init_tracing(config: &Config) {
    let targets = config.logging.overrides.iter().fold(
        Targets::new().with_default(LevelFilter::from(config.logging.level)),
        |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
    );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(targets)
        .init();
}

fn connector(config: &Config) -> Arc<SidecarConnector> {
    Arc::new(SidecarConnector::new(
        config.sidecar.python_path.clone(),
        config.sidecar.script_path.clone(),
    ))
}

/// Engine for one-shot entry management; nothing is loaded.
async fn offline_engine(config: &Config) -> anyhow::Result<Engine> {
    let path = config.storage.entries_file();
    let entries = ConfigEntries::load(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Engine::new(connector(config), Arc::new(entries)))
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("pulsehearth starting");

    let engine = Arc::new(offline_engine(&config).await?);

    let runner = Arc::clone(&engine);
    let engine_task = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!("Engine failed: {}", e);
        }
    });

    engine.setup_entries();

    let (api_shutdown, api_shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = if config.api.enabled {
        let engine = Arc::clone(&engine);
        let listen = config.api.listen;
        let port = config.api.port;
        Some(tokio::spawn(async move {
            if let Err(e) = pulsehearth::api::serve(engine, listen, port, api_shutdown_rx).await {
                tracing::error!("HTTP API server failed: {}", e);
            }
        }))
    } else {
        tracing::info!("HTTP API disabled");
        None
    };

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    let _ = api_shutdown.send(());
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            tracing::error!("HTTP API task failed: {}", e);
        }
    }

    engine.shutdown().await;
    engine_task.abort();

    tracing::info!("pulsehearth shutdown complete");
    Ok(())
}

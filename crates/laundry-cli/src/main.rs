//! `laundry` binary: runs the status bot and offers offline previews.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use laundry_core::{
    Engine, EngineConfig, LaundryConfig, MachineRegistry, Render, RegistrySnapshot,
    StatusRenderer,
};
use laundry_mqtt::{MqttSettings, TelemetryLink};
use laundry_proto::MachineClass;
use laundry_telegram::{CommandService, TelegramBot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Laundry room status bot - machine telemetry to a live Telegram message
#[derive(Parser, Debug)]
#[command(name = "laundry", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "laundry.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bot (default if no subcommand given)
    Run,

    /// Render a status message without connecting anywhere
    Preview(PreviewArgs),

    /// Print the resolved configuration with secrets masked
    Config(ConfigArgs),
}

/// Output format for preview and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    #[default]
    Table,
    /// JSON for programmatic access
    Json,
}

#[derive(Parser, Debug)]
struct PreviewArgs {
    /// Machine state as <class>/<slot>=<minutes>, e.g. washer/3=45 (repeatable)
    #[arg(long = "set", value_name = "STATE")]
    states: Vec<SlotState>,

    /// Write the status image to this PNG file
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

/// A `--set` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotState {
    class: MachineClass,
    slot: u32,
    minutes: i64,
}

impl FromStr for SlotState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("expected <washer|dryer>/<slot>=<minutes>, got '{s}'");
        let (key, minutes) = s.split_once('=').ok_or_else(invalid)?;
        let (class, slot) = key.split_once('/').ok_or_else(invalid)?;
        Ok(Self {
            class: class.trim().parse().map_err(|_| invalid())?,
            slot: slot.trim().parse().map_err(|_| invalid())?,
            minutes: minutes.trim().parse().map_err(|_| invalid())?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;
    match cli.command {
        None | Some(Commands::Run) => run_command(config).await,
        Some(Commands::Preview(args)) => preview_command(&config, args),
        Some(Commands::Config(args)) => config_command(&config, args),
    }
}

fn load_config(path: &Path) -> Result<LaundryConfig> {
    LaundryConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run_command(config: LaundryConfig) -> Result<()> {
    let bot = TelegramBot::from_token(config.telegram.bot_token.as_deref())
        .context("Set BOT_TOKEN or telegram.bot_token")?;
    let username = bot.verify().await.context("Failed to reach Telegram")?;
    info!(bot = %username, "Connected to Telegram");
    let bot = Arc::new(bot);

    match config.default_target() {
        Some(target) => info!(chat = %target, "Posting status updates"),
        None => warn!("telegram.chat_id is not set; status is only posted after /status"),
    }
    let mqtt = MqttSettings::from_config(&config).context("Invalid MQTT settings")?;

    let cancel = CancellationToken::new();
    spawn_signal_handlers(cancel.clone());

    let (engine, handle) = Engine::new(EngineConfig::from(&config), bot.clone());
    let engine_task = tokio::spawn(engine.run(cancel.clone()));

    let link_task = match mqtt {
        Some(settings) => {
            let bridge = handle.telemetry_bridge(config.topic_scheme());
            let link = TelemetryLink::new(&settings, bridge);
            Some(tokio::spawn(link.run(cancel.clone())))
        }
        None => {
            warn!("No MQTT broker configured (MQTT_SERVER); telemetry is disabled");
            None
        }
    };

    let service = CommandService::new(bot, handle, config.telegram.thread_id);
    let service_task = tokio::spawn(service.run(cancel.clone()));

    let engine_result = engine_task.await;
    cancel.cancel();
    if let Some(task) = link_task {
        task.await.context("MQTT link task failed")?;
    }
    service_task.await.context("Command service task failed")?;
    engine_result.context("Engine task failed")?;

    info!("Shut down cleanly");
    Ok(())
}

/// Cancels `cancel` on Ctrl+C or SIGTERM.
fn spawn_signal_handlers(cancel: CancellationToken) {
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            on_ctrl_c.cancel();
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    });
}

fn preview_snapshot(config: &LaundryConfig, states: &[SlotState]) -> Result<RegistrySnapshot> {
    let mut registry = MachineRegistry::new(config.layout());
    for state in states {
        registry
            .set_remaining(state.class, state.slot, state.minutes)
            .with_context(|| {
                format!(
                    "Cannot set {}/{} to {}",
                    state.class, state.slot, state.minutes
                )
            })?;
    }
    Ok(registry.snapshot())
}

fn preview_command(config: &LaundryConfig, args: PreviewArgs) -> Result<()> {
    let snapshot = preview_snapshot(config, &args.states)?;
    let artifact = StatusRenderer
        .render(&snapshot)
        .context("Failed to render status image")?;

    if let Some(path) = &args.output {
        if path.extension().is_some_and(|ext| !ext.eq_ignore_ascii_case("png")) {
            bail!("Status image is a PNG; use a .png output path");
        }
        std::fs::write(path, &artifact.image)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), bytes = artifact.image.len(), "Wrote status image");
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Table => println!("{}", artifact.text),
    }
    Ok(())
}

fn config_command(config: &LaundryConfig, args: ConfigArgs) -> Result<()> {
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config.masked())?),
        OutputFormat::Table => println!("{config}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use laundry_proto::SlotKey;

    use super::*;

    #[test]
    fn slot_state_parses() {
        assert_eq!(
            "washer/3=45".parse::<SlotState>(),
            Ok(SlotState {
                class: MachineClass::Washer,
                slot: 3,
                minutes: 45
            })
        );
        assert_eq!(
            "Dryer/10=0".parse::<SlotState>().map(|s| s.class),
            Ok(MachineClass::Dryer)
        );
    }

    #[test]
    fn slot_state_rejects_garbage() {
        for s in ["washer3=45", "washer/3", "washer/x=45", "ironer/3=45", "washer/3=soon"] {
            assert!(s.parse::<SlotState>().is_err(), "{s}");
        }
    }

    #[test]
    fn preview_applies_states() {
        let config = LaundryConfig::default();
        let states = ["washer/3=45", "dryer/1=7"].map(|s| s.parse::<SlotState>().unwrap());
        let snapshot = preview_snapshot(&config, &states).unwrap();
        assert_eq!(snapshot.remaining(SlotKey::washer(3)), Some(45));
        assert_eq!(snapshot.remaining(SlotKey::dryer(1)), Some(7));
    }

    #[test]
    fn preview_rejects_out_of_range_slots() {
        let config = LaundryConfig::default();
        let states = ["washer/11=5".parse::<SlotState>().unwrap()];
        assert!(preview_snapshot(&config, &states).is_err());
    }

    #[test]
    fn cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["laundry"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("laundry.yml"));
    }

    #[test]
    fn preview_args_parse() {
        let cli = Cli::try_parse_from([
            "laundry", "preview", "--set", "washer/1=5", "--set", "dryer/2=0", "--format", "json",
        ])
        .unwrap();
        let Some(Commands::Preview(args)) = cli.command else {
            panic!("expected preview");
        };
        assert_eq!(args.states.len(), 2);
        assert_eq!(args.format, OutputFormat::Json);

        assert!(Cli::try_parse_from(["laundry", "preview", "--set", "dryer/2=F"]).is_err());
    }
}

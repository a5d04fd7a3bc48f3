//! Fonacom CLI - drive a serial cellular modem from the command line
//!
//! One-shot status queries, settings and SMS operations, plus a long-running
//! `supervise` mode that keeps the link alive and auto-replies to incoming
//! texts when the ring line falls.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use fonacom_core::config::AppConfig;
use fonacom_core::core::logger::{transcript_filename, TranscriptLogger};
use fonacom_core::core::ring::{RingLine, SysfsRingLine};
use fonacom_core::core::transport::{list_ports, ModemTransport};
use fonacom_core::{
    CliResult, ExitCodes, FixedReply, ModemError, ReplyPayload, RingSupervisor, SerialTransport,
    Session, SimulatedModem, TextMessage,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Fonacom CLI
#[derive(Parser, Debug)]
#[command(
    name = "fonacom",
    author = "Fonacom Team",
    version,
    about = "Control a FONA/SIM800 cellular modem over a serial port",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "FONACOM_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overrides the config file
    #[arg(short, long, env = "FONACOM_PORT")]
    port: Option<String>,

    /// Baud rate, overrides the config file
    #[arg(short, long)]
    baud: Option<u32>,

    /// Talk to a built-in simulated modem instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Read a status value (signal_strength, battery_state, ...) or a setting
    Status {
        /// Status or setting name
        name: String,
    },

    /// Read the current value of a setting
    Query {
        /// Setting name (text_mode, error_verbosity, local_timestamp, ringer)
        setting: String,
    },

    /// Change a setting
    Set {
        /// Setting name
        setting: String,
        /// New value
        value: String,
    },

    /// SMS operations
    Sms {
        #[command(subcommand)]
        action: SmsAction,
    },

    /// Keep the link alive and auto-reply to incoming texts until Ctrl-C
    Supervise {
        /// Fixed reply text (default: current local time)
        #[arg(long)]
        reply: Option<String>,

        /// sysfs GPIO value file of the ring indicator pin
        #[arg(long)]
        ring_gpio: Option<PathBuf>,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum SmsAction {
    /// List stored messages
    List {
        /// Include messages already read
        #[arg(short, long)]
        all: bool,

        /// Do not mark listed messages as read
        #[arg(short, long)]
        leave_unread: bool,
    },

    /// Send a text message (140 characters max)
    Send {
        /// Destination number
        destination: String,
        /// Message text
        body: String,
    },

    /// Read one message by storage index
    Read {
        /// Storage index
        index: u32,
    },

    /// Delete one message by storage index
    Delete {
        /// Storage index
        index: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let _guard = init_tracing(&cli, &config);
    info!("fonacom v{}", fonacom_core::VERSION);

    let result = match run(&cli, &config).await {
        Ok(result) => result,
        Err(e) => match e.downcast_ref::<ModemError>() {
            Some(modem) => CliResult::from(modem),
            None => CliResult::error(ExitCodes::ERROR, format!("{e:#}")),
        },
    };

    match &result {
        CliResult::Success(Some(msg)) if !cli.quiet => println!("{msg}"),
        CliResult::Error(_, msg) => eprintln!("Error: {msg}"),
        _ => {}
    }
    result.to_exit_code()
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load().map_err(|e| anyhow::anyhow!(e))?,
    };

    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    Ok(config)
}

fn init_tracing(cli: &Cli, config: &AppConfig) -> Option<WorkerGuard> {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_directory(config) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fonacom.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Configured log directory, created if needed
fn log_directory(config: &AppConfig) -> Option<&Path> {
    let dir = config.logging.directory.as_deref()?;
    std::fs::create_dir_all(dir).ok()?;
    Some(dir)
}

fn open_session(cli: &Cli, config: &AppConfig) -> anyhow::Result<Session> {
    let transport: Box<dyn ModemTransport> = if cli.simulate {
        Box::new(SimulatedModem::new())
    } else {
        Box::new(SerialTransport::new(config.serial_config()))
    };

    let session_config = config.session_config();
    if !config.logging.transcript {
        return Ok(Session::new(session_config, transport));
    }

    let dir = log_directory(config).context("transcript enabled but no log directory")?;
    let format = config.logging.transcript_format;
    let path = dir.join(transcript_filename("transcript", format));
    let mut transcript = TranscriptLogger::new();
    transcript
        .start(&path, format)
        .with_context(|| format!("opening transcript {}", path.display()))?;
    info!(path = %path.display(), "recording transcript");

    Ok(Session::with_transcript(session_config, transport, transcript.shared()))
}

async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts => show_ports(cli),
        Commands::ExitCodes => {
            fonacom_core::cli::print_exit_codes();
            Ok(CliResult::success())
        }
        Commands::Supervise { reply, ring_gpio } => {
            supervise(cli, config, reply.clone(), ring_gpio.clone()).await
        }
        command => {
            let session = open_session(cli, config)?;
            let mut link = session.lock().await;
            link.connect().await?;
            let result = one_shot(cli, &mut link, command).await;
            if let Err(e) = link.disconnect().await {
                warn!("disconnect failed: {}", e);
            }
            result
        }
    }
}

async fn one_shot(
    cli: &Cli,
    link: &mut fonacom_core::ModemLink,
    command: &Commands,
) -> anyhow::Result<CliResult> {
    match command {
        Commands::Status { name } => {
            let lines = link.get_by_name(name).await?;
            print_lines(cli, name, &lines)?;
        }
        Commands::Query { setting } => {
            let lines = link.query(setting.parse()?).await?;
            print_lines(cli, setting, &lines)?;
        }
        Commands::Set { setting, value } => {
            let lines = link.set_by_name(setting, value).await?;
            print_lines(cli, setting, &lines)?;
        }
        Commands::Sms { action } => match action {
            SmsAction::List { all, leave_unread } => {
                let messages = link.list_messages(*all, *leave_unread).await?;
                print_messages(cli, &messages)?;
            }
            SmsAction::Send { destination, body } => {
                let lines = link.send_message(destination, body).await?;
                print_lines(cli, "send", &lines)?;
            }
            SmsAction::Read { index } => match link.read_message(*index).await? {
                Some(message) => print_messages(cli, std::slice::from_ref(&message))?,
                None => {
                    return Ok(CliResult::error(
                        ExitCodes::ERROR,
                        format!("No message at index {index}"),
                    ))
                }
            },
            SmsAction::Delete { index } => {
                link.delete_message(*index).await?;
                return Ok(CliResult::success_with_message(format!(
                    "Deleted message {index}"
                )));
            }
        },
        Commands::ListPorts | Commands::ExitCodes | Commands::Supervise { .. } => {
            return Ok(CliResult::error(
                ExitCodes::INTERNAL_ERROR,
                "not a one-shot command",
            ))
        }
    }
    Ok(CliResult::success())
}

async fn supervise(
    cli: &Cli,
    config: &AppConfig,
    reply: Option<String>,
    ring_gpio: Option<PathBuf>,
) -> anyhow::Result<CliResult> {
    let session = open_session(cli, config)?;
    let payload: Arc<dyn ReplyPayload> = match reply {
        Some(text) => Arc::new(FixedReply(text)),
        None => config.supervisor.payload(),
    };
    let handle = RingSupervisor::with_shared_payload(session, config.supervisor_config(), payload)
        .start();

    let mut ring_line = match ring_gpio.or_else(|| config.ring.gpio_value_path.clone()) {
        Some(path) => {
            let mut line = SysfsRingLine::new(path);
            let ring = handle.ring_handle();
            let subscribed = line.subscribe(
                config.ring.debounce(),
                Box::new(move || {
                    ring.ring();
                }),
            );
            if let Err(e) = subscribed {
                handle.shutdown().await?;
                return Err(e).context("ring line unavailable");
            }
            info!(path = %line.path().display(), "ring line armed");
            Some(line)
        }
        None => {
            warn!("no ring line configured, running heartbeat only");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping");

    if let Some(line) = ring_line.as_mut() {
        line.close();
    }
    handle.shutdown().await?;
    Ok(CliResult::success_with_message("Supervisor stopped"))
}

fn show_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = list_ports().map_err(ModemError::from)?;

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() && !cli.quiet {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{}", port.port_name);
            }
        }
    }
    Ok(CliResult::success())
}

fn print_lines(cli: &Cli, name: &str, lines: &[String]) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "name": name, "lines": lines });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn print_messages(cli: &Cli, messages: &[TextMessage]) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(messages)?),
        OutputFormat::Text => {
            if messages.is_empty() && !cli.quiet {
                println!("No messages.");
            }
            for message in messages {
                print!("{message}");
            }
        }
    }
    Ok(())
}

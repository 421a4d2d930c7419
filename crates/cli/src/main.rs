use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use sapa::backends::build_backends;
use sapa::channels::{ChannelError, ChannelHandle, InboundMessage, SenderId};
use sapa::router::{HandleOutcome, MessageRouter, RouterSettings};
use sapa::transcript::{build_transcript, DEFAULT_HISTORY_LIMIT};

#[derive(Parser)]
#[command(name = "sapa")]
#[command(about = "Sapa chatbot gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: SAPA_CONFIG_PATH or ~/.sapa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway: channel webhooks / long-poll, routing, health and history endpoints.
    Gateway {
        /// Config file path (default: SAPA_CONFIG_PATH or ~/.sapa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 15151)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Talk to the router from the terminal. Uses the configured backends and transcript.
    Chat {
        /// Config file path (default: SAPA_CONFIG_PATH or ~/.sapa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Sender id to chat as (shows up in the transcript).
        #[arg(long, default_value = "console")]
        sender: String,
    },

    /// Print the latest transcript entries for a sender.
    History {
        /// Config file path (default: SAPA_CONFIG_PATH or ~/.sapa/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        sender: String,

        #[arg(long, short = 'n', default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("sapa {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Gateway { config, port }) => run_gateway(config, port).await,
        Some(Commands::Chat { config, sender }) => run_chat(config, sender).await,
        Some(Commands::History {
            config,
            sender,
            limit,
        }) => run_history(config, sender, limit).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(sapa::config::default_config_path);
    let dir = sapa::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = sapa::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    sapa::gateway::run_gateway(config, path).await
}

/// Prints replies to stdout.
struct ConsoleChannel;

#[async_trait]
impl ChannelHandle for ConsoleChannel {
    fn id(&self) -> &str {
        "console"
    }

    fn stop(&self) {}

    async fn send_message(&self, _conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        println!("< {}", text.trim_end().replace('\n', "\n  "));
        Ok(())
    }
}

async fn run_chat(config_path: Option<PathBuf>, sender: String) -> anyhow::Result<()> {
    let (config, path) = sapa::config::load_config(config_path)?;
    let router = MessageRouter::new(
        Arc::new(ConsoleChannel),
        build_backends(&config.backends),
        build_transcript(&config, &path),
        RouterSettings::from_config(&config),
    );
    let sender = SenderId::from(sender);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        let msg = InboundMessage::new("console", sender.clone(), input);
        if let HandleOutcome::Replied(decision) = router.handle(msg).await {
            log::debug!("answered by {} ({})", decision.source, decision.language);
        }
    }
    router.flush_records().await;
    Ok(())
}

async fn run_history(
    config_path: Option<PathBuf>,
    sender: String,
    limit: usize,
) -> anyhow::Result<()> {
    let (config, path) = sapa::config::load_config(config_path)?;
    let transcript = build_transcript(&config, &path);
    let entries = transcript.history(&SenderId::from(sender.as_str()), limit).await?;
    if entries.is_empty() {
        println!("no history for {}", sender);
        return Ok(());
    }
    for e in entries {
        println!(
            "[{}] {} ({})",
            e.timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            e.source,
            e.language
        );
        println!("> {}", e.user_message);
        println!("< {}", e.bot_response);
    }
    Ok(())
}

//! Yuume CLI
//!
//! Terminal client for a Yuume-powered shop assistant. Drives the same
//! engine the embedded widget uses: persistent sessions, optimistic
//! sends, and the realtime channel.

mod cmd_chat;
mod cmd_reset;
mod cmd_status;
mod logging;
mod settings;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "yuume", version)]
#[command(about = "Talk to a Yuume-powered shop assistant from the terminal")]
struct Cli {
    /// Config file (default: ~/.yuume/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Shop domain the assistant answers for
    #[arg(long, global = true, env = "YUUME_SHOP_DOMAIN")]
    shop_domain: Option<String>,

    /// Chat API base URL
    #[arg(long, global = true, env = "YUUME_API_BASE")]
    api_base: Option<String>,

    /// Realtime WebSocket URL
    #[arg(long, global = true, env = "YUUME_SOCKET_URL")]
    socket_url: Option<String>,

    /// Language for locally generated copy (en, it)
    #[arg(long, global = true, env = "YUUME_LANG")]
    lang: Option<String>,

    /// Where session files live (default: ~/.yuume)
    #[arg(long, global = true, env = "YUUME_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive chat with the configured shop's assistant
    Chat,

    /// Show the stored session for the configured shop
    Status {
        /// Print the raw session as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discard the stored session
    Reset,

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "yuume", &mut std::io::stdout());
        return Ok(());
    }

    let _logging = logging::init_logging()?;
    let config = settings::resolve(&cli)?;

    match &cli.command {
        Commands::Chat => cmd_chat::run(config).await,
        Commands::Status { json } => cmd_status::run(&config, *json),
        Commands::Reset => cmd_reset::run(&config),
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

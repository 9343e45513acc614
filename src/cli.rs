//! CLI interface for the bridge daemon

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::gateway::{Gateway, GatewayConfig};

#[derive(Parser)]
#[command(name = "voicebridge")]
#[command(about = "Real-time voice-call bridge between a media gateway and cloud speech/agent services", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge daemon in the foreground (default when no command given)
    Serve {
        /// Serve over a locally self-signed TLS certificate instead of plain HTTP
        #[arg(long)]
        tls: bool,
    },
    /// Manage the bridge configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration and its file path
    Show,
    /// Validate the configuration file without starting the daemon
    Validate,
    /// Replace the shared secret with a freshly generated one
    RegenerateSecret,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve { tls: false }) => serve(false).await,
        Some(Commands::Serve { tls: true }) => serve(true).await,
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Show => show_config(),
            ConfigCommands::Validate => validate_config(),
            ConfigCommands::RegenerateSecret => regenerate_secret(),
        },
    }
}

async fn serve(tls: bool) -> Result<()> {
    let config = Config::load()?;
    let mut gateway = Gateway::with_daemon_config(config, GatewayConfig { tls });
    gateway.run().await
}

fn show_config() -> Result<()> {
    let config = Config::load()?;
    println!("config file: {}", crate::config::config_path()?.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn validate_config() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    println!("configuration is valid");
    Ok(())
}

fn regenerate_secret() -> Result<()> {
    let mut config = Config::load()?;
    config.bridge.secret = crate::config::generate_secret();
    config.save()?;
    println!("generated and saved a new shared secret");
    Ok(())
}

//! `tryplay` CLI - play a stream URL with automatic backend fallback

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tryplay::{BackendKind, Config};

#[derive(Parser)]
#[command(name = "tryplay")]
#[command(about = "Play a stream URL, falling back across backends until one works")]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.config/tryplay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected stream type and the backend order for a URL
    Classify {
        /// Stream URL
        url: String,

        /// Backend that worked last time (native, muxed, segmented, transport)
        #[arg(long)]
        prefer: Option<BackendKind>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Play a stream, trying backends until one renders media
    Play {
        /// Stream URL
        url: String,

        /// Output file, or "-" for stdout
        #[arg(short, long, default_value = "-")]
        output: String,

        /// Pipe media to a player (vlc, mpv, ffplay, mplayer, iina)
        #[arg(short, long)]
        player: Option<String>,

        /// Trial window per backend: 20s, 500ms, 1m
        #[arg(long, value_parser = cmd::parse_duration)]
        window: Option<std::time::Duration>,

        /// Readiness polling period inside the window, 0 to disable
        #[arg(long, value_parser = cmd::parse_duration)]
        poll: Option<std::time::Duration>,

        /// Stop after this long once playing: 30s, 5m, 1h30m
        #[arg(short, long, value_parser = cmd::parse_duration)]
        duration: Option<std::time::Duration>,

        /// Cache-busting retries after every backend failed
        #[arg(long, default_value = "0")]
        retries: u32,

        /// Force a reconnect (fresh URL, backend memory reset) as a last resort
        #[arg(long)]
        force_reconnect: bool,

        /// Report state changes as JSON lines on stderr
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Classify { url, prefer, json } => {
            cmd::classify::cmd_classify(&url, prefer, json)?;
        }
        Commands::Play {
            url,
            output,
            player,
            window,
            poll,
            duration,
            retries,
            force_reconnect,
            json,
        } => {
            let options = cmd::play::PlayOptions {
                url,
                output,
                player,
                window,
                poll,
                duration,
                retries,
                force_reconnect,
                json,
            };
            cmd::play::cmd_play(&config, options).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout may be carrying media.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "tryplay=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

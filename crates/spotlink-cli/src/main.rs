//! spotlink - link a Spotify account and manage it from the terminal.
//!
//! Also runs the backend relay that holds the Spotify client secret.

mod commands;

use std::io;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use spotlink_core::api::resources::{
    DEFAULT_PLAYLIST_LIMIT, DEFAULT_RECOMMENDATION_LIMIT, DEFAULT_SAVED_TRACKS_LIMIT,
    DEFAULT_SEARCH_LIMIT,
};
use spotlink_core::{ApiError, Config};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name prefix in the cache directory
const LOG_FILE: &str = "spotlink.log";

#[derive(Parser)]
#[command(name = "spotlink")]
#[command(about = "Link a Spotify account, browse and manage playlists and playback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link a Spotify account (prints the authorization URL)
    Login {
        /// Authorization code or the full redirect URL; prompted for when omitted
        #[arg(long)]
        code: Option<String>,
    },
    /// Forget the linked account
    Logout,
    /// Show whether an account is linked
    Status,
    /// Show the linked user's profile
    Me,
    /// List your playlists
    Playlists {
        #[arg(long, default_value_t = DEFAULT_PLAYLIST_LIMIT)]
        limit: u32,
    },
    /// Create a playlist
    CreatePlaylist {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        public: bool,
    },
    /// Add tracks (spotify:track:... URIs) to a playlist
    AddTracks {
        #[arg(value_name = "PLAYLIST_ID")]
        playlist_id: String,
        #[arg(value_name = "URI", required = true)]
        uris: Vec<String>,
    },
    /// Search for tracks
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u32,
    },
    /// Get recommendations from seed tracks and/or genres
    Recommend {
        #[arg(long = "track")]
        tracks: Vec<String>,
        #[arg(long = "genre")]
        genres: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_RECOMMENDATION_LIMIT)]
        limit: u32,
    },
    /// List genres usable as recommendation seeds
    Genres,
    /// List your saved tracks
    Saved {
        #[arg(long, default_value_t = DEFAULT_SAVED_TRACKS_LIMIT)]
        limit: u32,
    },
    /// Save a track to your library
    Save {
        #[arg(value_name = "TRACK_ID")]
        track_id: String,
    },
    /// Show the current playback state
    Playback,
    /// Start or resume playback
    Play {
        #[arg(long)]
        device: Option<String>,
        /// Context to play, e.g. spotify:playlist:...
        #[arg(long)]
        context: Option<String>,
        #[arg(long = "uri")]
        uris: Vec<String>,
    },
    /// Pause playback
    Pause,
    /// Skip to the next track
    Next,
    /// Skip to the previous track
    Previous,
    /// Set playback volume (0-100)
    Volume {
        percent: u8,
    },
    /// Run the backend relay (token exchange and music generation proxy)
    Relay {
        /// Overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug). When a cache
/// directory is available logs are also written to a daily rolling file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_dir = config.cache_dir().ok();
    let _guard = init_tracing(log_dir.as_deref());
    info!("spotlink starting");

    match commands::run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if e
                .downcast_ref::<ApiError>()
                .is_some_and(ApiError::requires_reauthorization)
            {
                eprintln!("Run `spotlink login` to link your Spotify account.");
            }
            ExitCode::FAILURE
        }
    }
}

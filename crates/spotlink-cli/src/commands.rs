use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use spotlink_core::auth::parse_callback;
use spotlink_core::relay::{self, RelaySettings};
use spotlink_core::{ApiClient, Config, FileStore, KeyringStore, TokenStore, TokenStoreKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::Commands;

/// Build the one client instance for this process
fn build_client(config: &Config) -> Result<ApiClient> {
    let settings = config.client_settings()?;
    let store: Arc<dyn TokenStore> = match config.token_store {
        TokenStoreKind::Keyring => Arc::new(KeyringStore::new()),
        TokenStoreKind::File => Arc::new(FileStore::new(config.cache_dir()?)),
    };
    Ok(ApiClient::new(settings, store)?)
}

fn print_json(value: &Value) -> Result<()> {
    if value.is_null() {
        println!("OK");
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

pub(crate) async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        // The relay runs without a linked account or client id
        Commands::Relay { port } => handle_relay(port).await,
        command => {
            let client = build_client(config)?;
            run_with_client(&client, command, config).await
        }
    }
}

async fn run_with_client(client: &ApiClient, command: Commands, config: &Config) -> Result<()> {
    let payload = match command {
        Commands::Login { code } => return handle_login(client, code).await,
        Commands::Logout => {
            client.logout();
            println!("Spotify account unlinked.");
            return Ok(());
        }
        Commands::Status => return handle_status(client, config),
        Commands::Me => client.get_profile().await?,
        Commands::Playlists { limit } => client.get_user_playlists(limit).await?,
        Commands::CreatePlaylist {
            name,
            description,
            public,
        } => client.create_playlist(&name, &description, public).await?,
        Commands::AddTracks { playlist_id, uris } => {
            client.add_tracks_to_playlist(&playlist_id, &uris).await?
        }
        Commands::Search { query, limit } => client.search_tracks(&query, limit).await?,
        Commands::Recommend {
            tracks,
            genres,
            limit,
        } => client.get_recommendations(&tracks, &genres, limit).await?,
        Commands::Genres => client.get_available_genres().await?,
        Commands::Saved { limit } => client.get_saved_tracks(limit).await?,
        Commands::Save { track_id } => client.save_track(&track_id).await?,
        Commands::Playback => client.get_current_playback().await?,
        Commands::Play {
            device,
            context,
            uris,
        } => {
            let uris = (!uris.is_empty()).then_some(uris.as_slice());
            client
                .start_playback(device.as_deref(), context.as_deref(), uris)
                .await?
        }
        Commands::Pause => client.pause_playback().await?,
        Commands::Next => client.skip_to_next().await?,
        Commands::Previous => client.skip_to_previous().await?,
        Commands::Volume { percent } => client.set_volume(percent).await?,
        Commands::Relay { port } => return handle_relay(port).await,
    };

    print_json(&payload)
}

async fn prompt_line(prompt: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read from stdin")?;
    Ok(line)
}

async fn handle_login(client: &ApiClient, code: Option<String>) -> Result<()> {
    let input = match code {
        Some(code) => code,
        None => {
            println!("Open this URL in your browser and approve access:");
            println!();
            println!("  {}", client.authorization_url());
            println!();
            prompt_line("Paste the redirect URL (or just the code): ").await?
        }
    };

    let code = parse_callback(&input)?;
    client.complete_authorization(&code).await?;

    // Best effort: greet the user by name
    match client.get_profile().await {
        Ok(profile) => {
            let name = profile
                .get("display_name")
                .and_then(Value::as_str)
                .or_else(|| profile.get("id").and_then(Value::as_str))
                .unwrap_or("unknown user");
            println!("Linked Spotify account: {}", name);
        }
        Err(e) => {
            tracing::warn!("Linked, but profile lookup failed: {}", e);
            println!("Spotify account linked.");
        }
    }
    Ok(())
}

fn handle_status(client: &ApiClient, config: &Config) -> Result<()> {
    let credentials = client.credentials();
    let store = match config.token_store {
        TokenStoreKind::Keyring => "keyring",
        TokenStoreKind::File => "file",
    };
    println!("Token store:    {}", store);
    println!(
        "Linked:         {}",
        if client.is_authenticated() { "yes" } else { "no" }
    );
    println!(
        "Refresh token:  {}",
        if credentials.refresh_token.is_some() { "present" } else { "absent" }
    );
    Ok(())
}

async fn handle_relay(port: Option<u16>) -> Result<()> {
    let mut settings = RelaySettings::from_env()?;
    if let Some(port) = port {
        settings.bind_addr.set_port(port);
    }
    println!("Relay listening on {}", settings.bind_addr);
    relay::serve(settings).await
}

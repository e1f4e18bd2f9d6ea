//! divcache - command line access to divination card price snapshots.
//!
//! Signs in anonymously on first use and keeps the session in an encrypted
//! file, so repeated invocations reuse the same identity.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use divcache_core::{
    AuthManager, BackendClient, Config, CredentialStore, KeyringSecureStorage, LocalFileSystem,
    SupabaseAuth,
};

const USAGE: &str = "\
Usage: divcache <command>

Commands:
  status                    Show the anonymous identity
  leagues <game>            List active leagues of a game (poe1, poe2)
  snapshot <game> <league>  Print the latest price snapshot of a league
  call <function> [json]    Invoke an edge function with a JSON payload
  sign-out                  Forget the stored identity

Configuration is read from config.json and DIVCACHE_* environment variables.";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=divcache_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_client(config: &Config) -> Result<BackendClient> {
    let store = CredentialStore::new(
        Arc::new(LocalFileSystem),
        Arc::new(KeyringSecureStorage::new()),
        Config::session_path()?,
        config.profile(),
    );
    let auth = Arc::new(AuthManager::new(store, SupabaseAuth::factory()));
    let client = BackendClient::new(auth)?.with_request_timeout(config.request_timeout());

    let Some(endpoint) = config.endpoint() else {
        bail!("Backend not configured: set DIVCACHE_SUPABASE_URL and DIVCACHE_SUPABASE_ANON_KEY");
    };
    client
        .configure(&endpoint.url, &endpoint.anon_key)
        .await
        .context("Failed to connect to backend")?;
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    if matches!(args.first().copied(), None | Some("help" | "--help" | "-h")) {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    info!(profile = ?config.profile(), "divcache starting");

    match args.as_slice() {
        ["status"] => {
            let client = build_client(&config).await?;
            print_json(&client.auth_status().await)?;
        }
        ["leagues", game] => {
            let client = build_client(&config).await?;
            print_json(&client.get_leagues(game).await?)?;
        }
        ["snapshot", game, league] => {
            let client = build_client(&config).await?;
            print_json(&client.get_latest_snapshot(game, league).await?)?;
        }
        ["call", function, rest @ ..] if rest.len() <= 1 => {
            let payload: serde_json::Value = match rest.first() {
                Some(raw) => serde_json::from_str(raw).context("Payload is not valid JSON")?,
                None => serde_json::json!({}),
            };
            let client = build_client(&config).await?;
            let reply: serde_json::Value = client.call_endpoint(function, &payload).await?;
            print_json(&reply)?;
        }
        ["sign-out"] => {
            let client = build_client(&config).await?;
            client.sign_out().await;
            println!("Signed out");
        }
        _ => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", args.join(" "));
        }
    }

    Ok(())
}

//! Run one community content request from the command line.
//!
//! Usage: contextualize <payload.json> --providers <dir> [--cache <db>]
//!        [--no-cache] [--static] [--headed] [--implicit-wait <secs>] [--wait]
//!
//! Prints the JSON response. With `--wait` the background extraction is
//! awaited before exiting; otherwise the process exits once the response is
//! printed and any unfinished extraction is abandoned.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use contextualize::config::{EngineSettings, SessionBackend};
use contextualize::extractor::Engine;
use contextualize::service::{CommunityService, InFlight};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "contextualize",
    about = "Extract research content for a community payload",
    version
)]
struct Args {
    /// Community payload JSON file
    payload: PathBuf,

    /// Directory holding one configuration directory per provider
    #[arg(long)]
    providers: PathBuf,

    /// SQLite cache database
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Extract without reading or writing the cache
    #[arg(long)]
    no_cache: bool,

    /// Fetch plain HTML instead of driving Chrome
    #[arg(long = "static")]
    static_html: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Default implicit wait in seconds
    #[arg(long, value_name = "SECS")]
    implicit_wait: Option<f64>,

    /// Wait for the background extraction to finish before exiting
    #[arg(long)]
    wait: bool,
}

impl Args {
    fn settings(&self) -> Result<EngineSettings> {
        let backend = if self.static_html {
            SessionBackend::Static
        } else {
            SessionBackend::Chromium
        };
        let mut builder = EngineSettings::builder()
            .use_cache(!self.no_cache)
            .session_backend(backend)
            .headless(!self.headed);
        if let Some(path) = &self.cache {
            builder = builder.cache_path(path);
        }
        if let Some(secs) = self.implicit_wait {
            builder = builder.implicit_wait(secs);
        }
        builder
            .provider_root(&self.providers)
            .build()
            .context("Invalid engine settings")
    }
}

fn init_logging() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("chromiumoxide::handler", log::LevelFilter::Off)
        .filter_module("chromiumoxide::conn", log::LevelFilter::Off)
        .filter_module("sqlx", log::LevelFilter::Warn)
        .init();

    // The log facade already belongs to env_logger, so install the tracing
    // subscriber directly rather than through `init()`, which would also
    // claim it.
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let raw = tokio::fs::read_to_string(&args.payload)
        .await
        .with_context(|| format!("Failed to read payload {}", args.payload.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Payload {} is not valid JSON", args.payload.display()))?;

    let engine = Engine::connect(args.settings()?).await?;
    let service = CommunityService::from_payload(engine, &payload, InFlight::new())?;
    log::info!("Handling request for {}", service.search());

    let outcome = service.handle_request().await?;
    println!("{}", serde_json::to_string_pretty(&outcome.response)?);

    if let Some(extraction) = outcome.extraction {
        if args.wait {
            let failures = extraction.await.context("Background extraction panicked")?;
            log::info!("Background extraction finished with {failures} failed extractor(s)");
        } else {
            log::info!("Not waiting for background extraction; pass --wait to let it finish");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_engine_settings() {
        let args = Args::try_parse_from([
            "contextualize",
            "payload.json",
            "--providers",
            "providers",
            "--static",
            "--no-cache",
            "--implicit-wait",
            "1.5",
        ])
        .unwrap();
        assert_eq!(args.payload, PathBuf::from("payload.json"));
        assert!(!args.wait);

        let settings = args.settings().unwrap();
        assert_eq!(settings.session_backend(), SessionBackend::Static);
        assert!(!settings.use_cache());
        assert!(settings.headless());
        assert_eq!(settings.implicit_wait_override(), Some(1.5));
    }

    #[test]
    fn providers_are_required() {
        assert!(Args::try_parse_from(["contextualize", "payload.json"]).is_err());
    }
}

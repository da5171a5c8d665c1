//! Conduit - Command-line entry point
//!
//! Loads the engine settings, builds the protocol engine and runs one
//! subcommand.

mod cli;
mod output;
mod send;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use conduit_domain::{Deadline, EngineSettings, ProxyConfig};
use conduit_infrastructure::{Engine, SettingsRepository};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::cli::{Cli, Command, ConfigAction};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let repository = cli
        .config
        .clone()
        .map_or_else(SettingsRepository::new, SettingsRepository::at);
    let settings = apply_overrides(
        repository.load().await.context("loading settings")?,
        &cli,
    );

    match &cli.command {
        Command::Send(args) => {
            let timeout_ms = settings.default_timeout_ms;
            let engine = engine(settings);
            send::run(&engine, args, timeout_ms).await
        }
        Command::Services { address } => {
            let deadline = Deadline::after_millis(settings.default_timeout_ms);
            let engine = engine(settings);
            for service in engine.grpc.list_services(address, deadline).await? {
                println!("{service}");
            }
            Ok(())
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
                Ok(())
            }
            ConfigAction::Path => {
                match repository.path() {
                    Some(path) => println!("{}", path.display()),
                    None => println!("no config directory on this platform"),
                }
                Ok(())
            }
            ConfigAction::Init => {
                repository.save(&settings).await.context("writing settings")?;
                info!(path = ?repository.path(), "Settings written");
                Ok(())
            }
        },
    }
}

fn apply_overrides(mut settings: EngineSettings, cli: &Cli) -> EngineSettings {
    if let Some(timeout_ms) = cli.default_timeout_ms {
        settings.default_timeout_ms = timeout_ms;
    }
    if let Some(proxy) = &cli.proxy {
        settings.proxy = ProxyConfig {
            url: proxy.clone(),
            ..settings.proxy
        };
    }
    settings
}

fn engine(settings: EngineSettings) -> Engine {
    Engine::with_prompt(
        settings,
        Arc::new(|url: &Url| eprintln!("Open this URL to authorize the request:\n  {url}")),
    )
}

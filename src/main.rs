use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use intelsync::{
    session::HttpTransport, BoundingRegion, ClientConfig, ConfigLoader, IntelApi, IntelApiBuilder,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Map tile and COMM feed sync")]
struct Cli {
    /// Path to a YAML client config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cookie string, overrides the config file
    #[arg(long, global = true)]
    cookies: Option<String>,

    /// Proxy URL, forces a single connection
    #[arg(long, global = true)]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch all entities in a box and print a summary
    Tiles {
        #[command(flatten)]
        area: Area,

        /// Fail if any tile stays unresolved
        #[arg(long)]
        strict: bool,
    },
    /// Page through COMM messages in a box
    Plexts {
        #[command(flatten)]
        area: Area,

        #[arg(long, default_value = "all")]
        tab: String,

        /// Lower time bound in epoch ms
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        start: i64,

        /// Upper time bound in epoch ms
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        end: i64,

        /// Oldest messages first
        #[arg(long)]
        reverse: bool,

        /// Stop after this many messages
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Fetch one portal with full details
    Portal { guid: String },
}

#[derive(Debug, Args)]
struct Area {
    #[arg(long, allow_hyphen_values = true)]
    min_lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    min_lng: f64,
    #[arg(long, allow_hyphen_values = true)]
    max_lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    max_lng: f64,
    #[arg(long, default_value_t = 15)]
    zoom: u32,
}

impl Area {
    fn region(&self) -> BoundingRegion {
        BoundingRegion::from_box(self.min_lat, self.min_lng, self.max_lat, self.max_lng, self.zoom)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::new(".").load(path)?,
        None => ClientConfig::default(),
    };
    if cli.cookies.is_some() {
        config.cookies = cli.cookies.clone();
    }
    if cli.proxy.is_some() {
        config.proxy = cli.proxy.clone();
    }
    if let Command::Tiles { strict: true, .. } = cli.command {
        config.require_complete = true;
    }
    config.validate()?;
    init_tracing(&config.log_level);

    let transport = HttpTransport::new(&config)?;
    transport.connect().await.context("Failed to log in")?;
    let api = IntelApiBuilder::from_config(transport, &config).build();

    run(&api, cli.command).await
}

async fn run(api: &IntelApi<HttpTransport>, command: Command) -> Result<()> {
    match command {
        Command::Tiles { area, .. } => {
            let region = area.region();
            let tiles = api.entities(&region).await?;
            println!(
                "{} tiles resolved, {} unresolved: {} portals, {} links, {} fields",
                tiles.len(),
                tiles.unresolved_count(),
                tiles.portals().count(),
                tiles.links().count(),
                tiles.fields().count()
            );
            for key in tiles.unresolved() {
                println!("unresolved {key}");
            }
        }
        Command::Plexts {
            area,
            tab,
            start,
            end,
            reverse,
            limit,
        } => {
            let pager = api.plexts(&area.region(), &tab, start, end, reverse)?;
            let mut messages = Box::pin(pager.into_stream().take(limit.unwrap_or(usize::MAX)));
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            let mut count = 0usize;
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("interrupted");
                        break;
                    }
                    next = messages.next() => {
                        let Some(plext) = next else { break };
                        let plext = plext?;
                        count += 1;
                        println!(
                            "{} {}",
                            plext.timestamp_ms,
                            plext.text.as_deref().unwrap_or_default()
                        );
                    }
                }
            }
            info!(count, "messages printed");
        }
        Command::Portal { guid } => {
            let portal = api.portal(&guid).await?;
            println!("{}", serde_json::to_string_pretty(&portal)?);
        }
    }
    Ok(())
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

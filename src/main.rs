//! `canal` CLI - browse, search and resolve scraping sources

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use canal::{CatalogKind, Config, IdentityCodec, Resolver, Token};

#[derive(Parser)]
#[command(name = "canal")]
#[command(about = "Stateless resolver over a federation of scraping sources")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/canal/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available sources
    Sources,

    /// Search one source, or the default sources in order
    Search {
        /// Search terms
        query: String,

        /// Source name
        #[arg(short, long)]
        source: Option<String>,

        /// Catalog kind (movie, series)
        #[arg(short, long, default_value = "movie")]
        kind: CatalogKind,

        /// Season stamped on every result
        #[arg(long)]
        season: Option<u32>,

        /// Episode stamped on every result
        #[arg(long)]
        episode: Option<u32>,
    },

    /// List a source's catalog (default sources when omitted)
    List {
        /// Source name
        source: Option<String>,

        /// Catalog kind (movie, series)
        #[arg(short, long, default_value = "movie")]
        kind: CatalogKind,
    },

    /// Catalog entry for a token
    Detail {
        /// `local:` token
        token: String,
    },

    /// Resolve a token to playable streams
    Streams {
        /// `local:` or `canonical:` token
        token: String,

        /// Catalog kind (movie, series)
        #[arg(short, long, default_value = "movie")]
        kind: CatalogKind,

        /// Print `url|Referer=...` player locators instead of JSON
        #[arg(long)]
        player: bool,
    },

    /// Decode a token offline
    Decode {
        /// `local:` token
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { token } => cmd_decode(&token),
        command => {
            let config = load_config(cli.config.as_deref())?;
            let resolver = Resolver::new(config).context("Failed to build resolver")?;
            run(&resolver, command).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::from_path(path)?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };
    Ok(config)
}

async fn run(resolver: &Resolver, command: Commands) -> Result<()> {
    match command {
        Commands::Sources => print_json(&resolver.sources()),
        Commands::Search {
            query,
            source,
            kind,
            season,
            episode,
        } => {
            let entries = resolver
                .list_or_search(source.as_deref(), kind, Some(&query), season, episode)
                .await;
            print_json(&entries)
        }
        Commands::List { source, kind } => {
            let entries = resolver.list_or_search(source.as_deref(), kind, None, None, None).await;
            print_json(&entries)
        }
        Commands::Detail { token } => match resolver.get_detail(&token).await {
            Some(entry) => print_json(&entry),
            None => anyhow::bail!("not found: {token}"),
        },
        Commands::Streams { token, kind, player } => {
            let streams = resolver.resolve_streams(&token, kind).await;
            if player {
                for stream in &streams {
                    match stream.player_subtitle() {
                        Some(subtitle) => println!("{}\t{}\t{subtitle}", stream.label, stream.player_url()),
                        None => println!("{}\t{}", stream.label, stream.player_url()),
                    }
                }
                Ok(())
            } else {
                print_json(&streams)
            }
        }
        Commands::Decode { token } => cmd_decode(&token),
    }
}

fn cmd_decode(token: &str) -> Result<()> {
    let codec = IdentityCodec::default();
    let unit = codec
        .decode_token(&Token::parse(token))
        .context("Failed to decode token")?;
    print_json(&unit)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

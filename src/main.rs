//! Scion command line
//!
//! `scion find <path>` looks for a reusable torrent in the configured clients.
//! `scion inject <tracker> <torrent> <path>` adds a finished torrent to them.
//! `scion ids <hash>` prints the tracker torrent IDs found in a torrent's comment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use scion::client::ClientRegistry;
use scion::config::Settings;
use scion::content::{ContentDescriptor, PieceSizePolicy};
use scion::service::{Injector, Resolver};

#[derive(Debug, Parser)]
#[command(name = "scion", version, about = "Reuse and inject torrents across BitTorrent clients")]
struct Cli {
    /// Client to use instead of the configured lists; "none" disables clients
    #[arg(long, global = true)]
    client: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find an existing torrent for local content
    Find {
        path: PathBuf,

        /// Piece-size policy, overriding the configured one
        #[arg(long)]
        policy: Option<PieceSizePolicy>,

        /// Infohash known to belong to the content; may repeat
        #[arg(long = "hash")]
        hashes: Vec<String>,
    },
    /// Add a torrent to the injecting clients
    Inject {
        tracker: String,
        torrent: PathBuf,
        path: PathBuf,
    },
    /// Print tracker torrent IDs from the comment of a torrent in a client
    Ids { hash: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scion=info".into());
    // Logs go to stderr so stdout stays machine-readable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("SCION_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let cli = Cli::parse();

    let settings = Settings::load()?;
    info!("Configuration loaded from {:?}", settings.config_path());

    let registry = ClientRegistry::from_configs(settings.clients.values())?;
    info!("{} client(s) configured", registry.len());

    if let Some(name) = cli.client.as_deref() {
        if name != "none" && settings.client(name).is_none() {
            bail!("Client '{}' is not configured", name);
        }
    }

    match cli.command {
        Command::Find {
            path,
            policy,
            hashes,
        } => {
            let mut descriptor = describe(&settings, &path, cli.client)?
                .with_policy(policy.unwrap_or(settings.general.piece_policy));
            descriptor.hash_hints = hashes;

            match Resolver::new(&settings, &registry).resolve(&descriptor).await {
                Some(found) => println!("{}", found.display()),
                None => println!("nothing reusable found"),
            }
        }
        Command::Inject {
            tracker,
            torrent,
            path,
        } => {
            let descriptor = describe(&settings, &path, cli.client)?;
            let outcomes = Injector::new(&settings, &registry)
                .inject_all(&torrent, &descriptor, &tracker)
                .await;

            if outcomes.is_empty() {
                println!("no clients to inject into");
            }
            for outcome in outcomes {
                match (outcome.hash, outcome.error) {
                    (Some(hash), _) => println!("{}: added {}", outcome.client, hash),
                    (None, error) => println!(
                        "{}: failed: {}",
                        outcome.client,
                        error.unwrap_or_default()
                    ),
                }
            }
        }
        Command::Ids { hash } => {
            let ids = Resolver::new(&settings, &registry)
                .tracker_ids_for_hash(&hash, cli.client.as_deref())
                .await;
            for id in ids {
                println!("{} {}", id.tracker, id.torrent_id.unwrap_or_default());
            }
        }
    }

    Ok(())
}

fn describe(settings: &Settings, path: &Path, client: Option<String>) -> Result<ContentDescriptor> {
    let mut descriptor = ContentDescriptor::scan(path)
        .with_context(|| format!("Failed to scan content at {:?}", path))?
        .with_policy(settings.general.piece_policy);
    descriptor.max_piece_size = settings.general.max_piece_size;
    descriptor.client = client;

    let work_dir = settings.general.tmp_dir.join(&descriptor.uuid);
    Ok(descriptor.with_work_dir(work_dir))
}

//! Command line interface for operating a node. Supports initialization,
//! authoring and editing posts, pulling remote posts, serving HTTP with the
//! background poller, and peer management.

mod config;
mod derive;
mod error;
mod markup;
mod peers;
mod poller;
mod post;
mod resolver;
mod server;
mod store;
mod sync;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::bail;
use clap::{Parser, Subcommand};

use config::Settings;
use store::Store;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "pantr",
    author,
    version,
    about = "File-backed federated micro-blog node"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the directory tree at `STORE_ROOT`.
    Init,
    /// Author a new post, or edit an existing one by slug.
    Post {
        /// Body text; reads `--file` when omitted.
        body: Option<String>,
        /// Read the body from a file instead.
        #[arg(long)]
        file: Option<String>,
        /// Edit the post with this slug instead of creating one.
        #[arg(long)]
        slug: Option<String>,
        /// GUID or URL of the post this one replies to.
        #[arg(long)]
        reference: Option<String>,
    },
    /// Pull one remote post by URL and merge it into local storage.
    Sync { url: String },
    /// Launch the HTTP service and the background peer poller.
    Serve {
        /// Log requests and poll cycles to stdout.
        #[arg(long)]
        verbose: bool,
    },
    /// Rebuild unique and reply indexes from stored posts.
    Reindex,
    /// Manage the polled peer list.
    Peer {
        #[command(subcommand)]
        action: PeerAction,
    },
}

/// Operations available under `pantr peer`.
#[derive(Subcommand)]
enum PeerAction {
    /// Add a peer base address after verifying it responds.
    Add { base: String },
    /// Remove a peer base address from the configuration.
    Remove { base: String },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Peer { action } => {
            handle_peer(action, &cli.env, &cfg).await?;
        }
        command => {
            let store = Store::new(cfg.store_root.clone());
            match command {
                Commands::Init => {
                    // Create the on-disk directory structure.
                    store.init()?;
                }
                Commands::Post {
                    body,
                    file,
                    slug,
                    reference,
                } => {
                    store.init()?;
                    let body = match (body, file) {
                        (Some(body), _) => body,
                        (None, Some(file)) => fs::read_to_string(file)?,
                        (None, None) => bail!("pass a body argument or --file"),
                    };
                    let post =
                        author_post(&store, &cfg, body, slug, reference, &mut rand::thread_rng())?;
                    println!("{}", serde_json::to_string_pretty(&post)?);
                }
                Commands::Sync { url } => {
                    store.init()?;
                    let syncer = build_syncer(&store, &cfg)?;
                    let post = syncer.sync(&url).await?;
                    println!("{}", serde_json::to_string_pretty(&post)?);
                }
                Commands::Reindex => {
                    // Rebuild indexes from the canonical post tree.
                    store.reindex()?;
                }
                Commands::Serve { verbose } => {
                    store.init()?;
                    let addr: SocketAddr = cfg.bind_http.as_str().parse()?;
                    let syncer = Arc::new(build_syncer(&store, &cfg)?);
                    // The poller runs only inside a serving process, never
                    // for one-off commands.
                    let poll_syncer = syncer.clone();
                    let poll_cfg = cfg.clone();
                    tokio::spawn(poller::run(
                        move || {
                            let syncer = poll_syncer.clone();
                            let cfg = poll_cfg.clone();
                            async move {
                                if verbose {
                                    println!("[poll] starting cycle");
                                }
                                peers::poll_peers(&syncer, &cfg).await
                            }
                        },
                        cfg.poll_min,
                        cfg.poll_max,
                        std::future::pending(),
                    ));
                    let state = server::HttpState {
                        store: store.clone(),
                        syncer,
                        domain: cfg.domain.clone(),
                        verbose,
                    };
                    server::serve_http(addr, state, std::future::pending()).await?;
                }
                Commands::Peer { .. } => unreachable!(),
            }
        }
    }
    Ok(())
}

fn build_syncer(store: &Store, cfg: &Settings) -> anyhow::Result<sync::Syncer> {
    Ok(sync::Syncer::new(
        store.clone(),
        peers::PeerBook::new(&cfg.store_root),
        derive::Deriver::default(),
        cfg.fetch_timeout,
    )?)
}

/// Create or edit a local post. The pipeline never retries slug collisions
/// internally; this caller regenerates the slug, bounded to three attempts.
fn author_post(
    store: &Store,
    cfg: &Settings,
    body: String,
    slug: Option<String>,
    reference: Option<String>,
    rng: &mut impl rand::Rng,
) -> anyhow::Result<post::Post> {
    let deriver = derive::Deriver::default();
    let (mut post, prior) = match slug {
        Some(slug) => {
            let Some(existing) = store.find_by_slug(&slug)? else {
                bail!("no post with slug {slug}");
            };
            if existing.domain != cfg.domain {
                bail!(
                    "{} is owned by {}, not this node",
                    existing.guid,
                    existing.domain
                );
            }
            let mut edited = existing.clone();
            edited.body = body;
            (edited, Some(existing))
        }
        None => (post::Post::draft(&cfg.domain, &body), None),
    };
    if let Some(raw) = reference {
        post.set_reference(&raw);
    }
    let mut attempts = 0;
    loop {
        deriver.prepare(&mut post, prior.as_ref(), rng, chrono::Utc::now())?;
        // A sampled slug may also land on one of our own posts; that is a
        // collision too, even though the store would accept the same guid.
        let taken = prior.is_none() && store.get(&post.guid)?.is_some();
        let result = if taken {
            Err(error::Error::Conflict {
                field: "slug",
                value: post.slug.clone(),
            })
        } else {
            store.save(&mut post, prior.as_ref())
        };
        match result {
            Ok(()) => return Ok(post),
            Err(error::Error::Conflict { field: "slug", .. })
                if prior.is_none() && attempts < 3 =>
            {
                attempts += 1;
                post.slug.clear();
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("pantr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("DOMAIN=127.0.0.1:7700\n");
    content.push_str("BIND_HTTP=127.0.0.1:7700\n");
    content.push_str("PEERS=\n");
    content.push_str("FETCH_TIMEOUT_SECS=10\n");
    content.push_str("POLL_MIN_SECS=30\n");
    content.push_str("POLL_MAX_SECS=90\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

async fn handle_peer(action: PeerAction, env_path: &str, cfg: &Settings) -> anyhow::Result<()> {
    match action {
        PeerAction::Add { base } => add_peer(env_path, cfg, base).await?,
        PeerAction::Remove { base } => remove_peer(env_path, cfg, base)?,
    }
    Ok(())
}

async fn add_peer(env_path: &str, cfg: &Settings, base: String) -> anyhow::Result<()> {
    let base = config::base_address(&base);
    if cfg.peers.iter().any(|existing| existing == &base) {
        bail!("peer already configured: {base}");
    }
    // Verify the peer responds before persisting it.
    let client = reqwest::Client::builder()
        .timeout(cfg.fetch_timeout)
        .build()?;
    client
        .get(format!("{base}healthz"))
        .send()
        .await?
        .error_for_status()?;
    let mut peers = cfg.peers.clone();
    peers.push(base);
    write_peers_to_env(env_path, &peers)?;
    Ok(())
}

fn remove_peer(env_path: &str, cfg: &Settings, base: String) -> anyhow::Result<()> {
    let base = config::base_address(&base);
    let mut peers = cfg.peers.clone();
    let before = peers.len();
    peers.retain(|existing| existing != &base);
    if peers.len() == before {
        bail!("peer not configured: {base}");
    }
    write_peers_to_env(env_path, &peers)?;
    Ok(())
}

fn write_peers_to_env(env_path: &str, peers: &[String]) -> anyhow::Result<()> {
    let content = fs::read_to_string(env_path)?;
    let peers_joined = peers.join(",");
    let mut new_content = String::new();
    let mut replaced = false;
    for line in content.lines() {
        if line.starts_with("PEERS=") {
            new_content.push_str(&format!("PEERS={peers_joined}\n"));
            replaced = true;
        } else {
            new_content.push_str(line);
            new_content.push('\n');
        }
    }
    if !replaced {
        new_content.push_str(&format!("PEERS={peers_joined}\n"));
    }
    fs::write(env_path, new_content)?;
    std::env::set_var("PEERS", peers_joined);
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}

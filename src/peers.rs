//! Peer bookkeeping and the batch poll cycle.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};

use crate::{
    config::Settings,
    error::Result,
    post::Post,
    sync::{parse_remote_url, Syncer},
};

/// On-disk book of peer base addresses, learned from the authors of merged
/// posts. Files are hash-named so arbitrary URLs stay filesystem-safe.
#[derive(Clone)]
pub struct PeerBook {
    root: PathBuf,
}

impl PeerBook {
    /// Peer files live under `peers/` in the store root.
    pub fn new(store_root: &Path) -> Self {
        Self {
            root: store_root.join("peers"),
        }
    }

    /// Record a peer base address; idempotent.
    pub fn remember(&self, base: &str) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let mut hasher = Sha1::new();
        hasher.update(base.as_bytes());
        let path = self
            .root
            .join(format!("{}.url", hex::encode(hasher.finalize())));
        if path.exists() {
            return Ok(());
        }
        fs::write(path, base)?;
        Ok(())
    }

    /// Every known peer base address, sorted for stable iteration.
    pub fn all(&self) -> Result<Vec<String>> {
        let mut peers = vec![];
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(peers),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            peers.push(fs::read_to_string(entry.path())?.trim().to_string());
        }
        peers.sort();
        Ok(peers)
    }
}

/// One batch poll cycle: walk every known peer's post index and pull each
/// foreign post through the synchronizer. Failures are isolated per peer
/// and per post so one broken target never starves the rest.
pub async fn poll_peers(syncer: &Syncer, cfg: &Settings) -> Result<()> {
    let mut bases = cfg.peers.clone();
    bases.extend(syncer.peers().all()?);
    bases.sort();
    bases.dedup();

    for base in bases {
        let urls = match fetch_post_index(syncer, &base).await {
            Ok(urls) => urls,
            Err(e) => {
                eprintln!("peer index error ({base}): {e}");
                continue;
            }
        };
        for url in urls {
            // A peer's index also lists posts we author; skip our own.
            match parse_remote_url(&url) {
                Ok(expected) if expected.domain == cfg.domain => continue,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("peer index entry error ({url}): {e}");
                    continue;
                }
            }
            if let Err(e) = syncer.sync(&url).await {
                eprintln!("sync error ({url}): {e}");
            }
        }
    }
    Ok(())
}

/// Fetch a peer's NDJSON post index and collect the canonical post URLs.
async fn fetch_post_index(syncer: &Syncer, base: &str) -> Result<Vec<String>> {
    let index_url = format!("{}posts", crate::config::base_address(base));
    let response = syncer
        .client()
        .get(&index_url)
        .query(&[("format", "json")])
        .send()
        .await?
        .error_for_status()?;
    let body = response.text().await?;
    let mut urls = vec![];
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let post: Post = serde_json::from_str(line)?;
        urls.push(post.url);
    }
    Ok(urls)
}

//! File-backed post storage with unique-constraint enforcement.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde_json::to_writer;
use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use crate::{
    derive,
    error::{Error, Result},
    post::Post,
};

/// Persistent store for posts and unique indexes rooted at `root`.
///
/// Posts live at `posts/<domain>/<slug>.json`, so the GUID doubles as the
/// storage address. Unique fields are claimed through plain files created
/// with `create_new`, which makes two writers racing on the same value
/// converge on a single winner.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        let dirs = [
            "posts",
            "log",
            "index/by-slug",
            "index/by-sha",
            "index/by-url",
            "index/replies",
            "peers",
        ];
        for d in dirs {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Load a post by GUID; `None` when it was never replicated locally.
    pub fn get(&self, guid: &str) -> Result<Option<Post>> {
        let Some(path) = self.post_path(guid) else {
            return Ok(None);
        };
        match fs::read_to_string(path) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load a post by its globally unique slug.
    pub fn find_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        let path = self.root.join("index/by-slug").join(slug);
        match fs::read_to_string(path) {
            Ok(guid) => self.get(guid.trim()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate and persist a post, claiming its unique fields. `prior` is
    /// the stored copy on updates; the store stamps `created_at` on insert.
    pub fn save(&self, post: &mut Post, prior: Option<&Post>) -> Result<()> {
        derive::validate(post, prior)?;
        let path = self.post_path(&post.guid).ok_or_else(|| {
            Error::Validation(format!("guid is not <domain>/<slug>: {}", post.guid))
        })?;

        self.claim("index/by-slug", "slug", &post.slug, &post.slug, &post.guid)?;
        self.claim("index/by-sha", "sha", &post.sha, &post.sha, &post.guid)?;
        self.claim("index/by-url", "url", &hashed(&post.url), &post.url, &post.guid)?;

        if prior.is_none() {
            post.created_at = Some(Utc::now());
        }

        // Write the post JSON atomically to its canonical path.
        let parent = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        to_writer(&tmp, post)?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        // Release claims on superseded unique values.
        if let Some(prior) = prior {
            if prior.sha != post.sha {
                self.release("index/by-sha", &prior.sha)?;
            }
            if prior.url != post.url {
                self.release("index/by-url", &hashed(&prior.url))?;
            }
        }

        self.index_reply(post)?;
        self.append_log(post)
    }

    /// All locally stored posts replying to `guid`. Ordering follows the
    /// index file, which grows in save order.
    pub fn replies(&self, guid: &str) -> Result<Vec<Post>> {
        let path = self.root.join("index/replies").join(hashed(guid));
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut posts = vec![];
        for line in data.lines() {
            // The index is append-only; re-check the live post still points here.
            if let Some(post) = self.get(line)? {
                if post.referenced_guid.as_deref() == Some(guid) {
                    posts.push(post);
                }
            }
        }
        Ok(posts)
    }

    /// Load every post under `posts/`.
    pub fn all(&self) -> Result<Vec<Post>> {
        let mut posts = vec![];
        let root = self.root.join("posts");
        if !root.exists() {
            return Ok(posts);
        }
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                let data = fs::read_to_string(entry.path())?;
                posts.push(serde_json::from_str(&data)?);
            }
        }
        Ok(posts)
    }

    /// Rebuild unique and reply indexes from the canonical post tree.
    pub fn reindex(&self) -> Result<()> {
        let index = self.root.join("index");
        if index.exists() {
            fs::remove_dir_all(&index)?;
        }
        for d in ["index/by-slug", "index/by-sha", "index/by-url", "index/replies"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        for post in self.all()? {
            self.claim("index/by-slug", "slug", &post.slug, &post.slug, &post.guid)?;
            self.claim("index/by-sha", "sha", &post.sha, &post.sha, &post.guid)?;
            self.claim("index/by-url", "url", &hashed(&post.url), &post.url, &post.guid)?;
            self.index_reply(&post)?;
        }
        Ok(())
    }

    /// Claim a unique value for `guid`. A claim already held by the same
    /// guid is idempotent; any other holder is a conflict.
    fn claim(
        &self,
        prefix: &str,
        field: &'static str,
        key: &str,
        value: &str,
        guid: &str,
    ) -> Result<()> {
        let path = self.root.join(prefix).join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                f.write_all(guid.as_bytes())?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)?;
                if holder.trim() == guid {
                    Ok(())
                } else {
                    Err(Error::Conflict {
                        field,
                        value: value.to_string(),
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, prefix: &str, key: &str) -> Result<()> {
        match fs::remove_file(self.root.join(prefix).join(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Record this post in the reply index of the post it references.
    fn index_reply(&self, post: &Post) -> Result<()> {
        let Some(referenced) = post.referenced_guid.as_deref() else {
            return Ok(());
        };
        let path = self.root.join("index/replies").join(hashed(referenced));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let existing = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if existing.lines().any(|line| line == post.guid) {
            return Ok(());
        }
        let mut f = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", post.guid)?;
        Ok(())
    }

    /// Append the saved revision to a newline-delimited log for tailing.
    fn append_log(&self, post: &Post) -> Result<()> {
        let path = self.root.join("log/posts.ndjson");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new().create(true).append(true).open(path)?;
        serde_json::to_writer(&mut f, post)?;
        f.write_all(b"\n")?;
        Ok(())
    }

    /// Canonical path for a GUID, `None` when the GUID cannot name a path.
    fn post_path(&self, guid: &str) -> Option<PathBuf> {
        let (domain, slug) = guid.rsplit_once('/')?;
        if domain.is_empty() || slug.is_empty() {
            return None;
        }
        if guid.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return None;
        }
        Some(
            self.root
                .join("posts")
                .join(domain)
                .join(format!("{slug}.json")),
        )
    }
}

/// Filesystem-safe name for arbitrary values such as URLs and GUIDs.
fn hashed(value: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

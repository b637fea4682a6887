//! Pull-based federation: fetch a remote post and merge it locally.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;

use crate::{
    derive::Deriver,
    error::{Error, Result},
    peers::PeerBook,
    post::{Post, RemotePost},
    store::Store,
};

/// Identity triple a remote URL promises to serve.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedPost {
    pub guid: String,
    pub domain: String,
    pub slug: String,
}

/// Parse `scheme://(domain/slug)(.json)?` into the identity it must serve.
pub fn parse_remote_url(url: &str) -> Result<ExpectedPost> {
    let malformed = || Error::MalformedUrl(url.to_string());
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(malformed)?;
    let rest = rest.strip_suffix(".json").unwrap_or(rest);
    let (domain, slug) = rest.rsplit_once('/').ok_or_else(malformed)?;
    if domain.is_empty() || slug.is_empty() {
        return Err(malformed());
    }
    Ok(ExpectedPost {
        guid: format!("{domain}/{slug}"),
        domain: domain.to_string(),
        slug: slug.to_string(),
    })
}

/// The origin of a post URL up through the domain segment, e.g.
/// `http://a.example/` for `http://a.example/abc123`.
pub fn author_base(url: &str) -> Option<String> {
    let scheme_end = if url.starts_with("http://") {
        7
    } else if url.starts_with("https://") {
        8
    } else {
        return None;
    };
    let slash = url[scheme_end..].find('/')?;
    Some(url[..scheme_end + slash + 1].to_string())
}

/// Fetches remote posts and merges them into the local store.
pub struct Syncer {
    store: Store,
    deriver: Deriver,
    peers: PeerBook,
    client: Client,
}

impl Syncer {
    pub fn new(
        store: Store,
        peers: PeerBook,
        deriver: Deriver,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self {
            store,
            deriver,
            peers,
            client,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn peers(&self) -> &PeerBook {
        &self.peers
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch `remote_url` and merge the result into local storage. Returns
    /// the local post whether or not the remote copy won.
    pub async fn sync(&self, remote_url: &str) -> Result<Post> {
        let expected = parse_remote_url(remote_url)?;

        let response = self
            .client
            .get(remote_url)
            .query(&[("format", "json")])
            .send()
            .await?
            .error_for_status()?;
        let payload = response.bytes().await?;
        let remote: RemotePost = serde_json::from_slice(&payload)
            .map_err(|e| Error::CorruptData(format!("{remote_url}: {e}")))?;

        // The representation must agree with the address it was fetched from.
        if remote.guid != expected.guid
            || remote.domain != expected.domain
            || remote.slug != expected.slug
        {
            return Err(Error::CorruptData(format!(
                "{} does not match its address {}",
                remote.guid, expected.guid
            )));
        }

        let prior = self.store.get(&expected.guid)?;
        // Last writer wins: only a strictly later remote edit replaces local
        // state.
        if let Some(local) = &prior {
            if local.edited_at.map_or(false, |t| remote.edited_at <= t) {
                return Ok(prior.unwrap());
            }
        }

        let mut post = prior.clone().unwrap_or_default();
        post.apply_remote(&remote);
        self.deriver
            .prepare(&mut post, prior.as_ref(), &mut rand::thread_rng(), Utc::now())?;
        // Re-derivation hashes the copied body; a disagreement means the
        // remote served a body that does not belong to its sha.
        if post.sha != remote.sha {
            return Err(Error::CorruptData(format!(
                "{}: sha does not match its body",
                post.guid
            )));
        }
        self.store.save(&mut post, prior.as_ref())?;

        // Author bookkeeping is best effort and never unwinds the merge.
        if let Some(base) = author_base(&post.url) {
            if let Err(e) = self.peers.remember(&base) {
                eprintln!("peer record error ({base}): {e}");
            }
        }

        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use chrono::{DateTime, TimeZone};
    use rand::{rngs::StdRng, SeedableRng};
    use std::net::SocketAddr;
    use tempfile::TempDir;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, secs).unwrap()
    }

    fn syncer(dir: &TempDir) -> Syncer {
        let store = Store::new(dir.path().to_path_buf());
        store.init().unwrap();
        let peers = PeerBook::new(dir.path());
        Syncer::new(store, peers, Deriver::default(), Duration::from_secs(2)).unwrap()
    }

    /// A fully derived post owned by `domain`, suitable as a remote fixture.
    fn remote_fixture(domain: &str, slug: &str, body: &str, edited_at: DateTime<Utc>) -> Post {
        let mut post = Post::draft(domain, body);
        post.slug = slug.to_string();
        let mut rng = StdRng::seed_from_u64(0);
        Deriver::default()
            .prepare(&mut post, None, &mut rng, edited_at)
            .unwrap();
        post.edited_at = Some(edited_at);
        post
    }

    /// Bind a fake remote node; the returned domain carries the ephemeral
    /// port so fixtures can claim it as their own.
    async fn bind_remote() -> (tokio::net::TcpListener, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        (listener, format!("127.0.0.1:{}", addr.port()))
    }

    /// Serve `value` for every `GET /:slug` on the bound listener.
    fn serve_remote(listener: tokio::net::TcpListener, value: serde_json::Value) {
        let app = Router::new().route(
            "/:slug",
            get(move || {
                let value = value.clone();
                async move { Json(value) }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });
    }

    #[test]
    fn parse_extracts_the_identity_triple() {
        let expected = ExpectedPost {
            guid: "a.example/abc123".into(),
            domain: "a.example".into(),
            slug: "abc123".into(),
        };
        assert_eq!(parse_remote_url("http://a.example/abc123").unwrap(), expected);
        assert_eq!(
            parse_remote_url("https://a.example/abc123.json").unwrap(),
            expected
        );
        // the domain segment is greedy
        let nested = parse_remote_url("http://a.example/cat/xyz999").unwrap();
        assert_eq!(nested.domain, "a.example/cat");
        assert_eq!(nested.slug, "xyz999");
    }

    #[test]
    fn parse_rejects_non_matching_urls() {
        for url in ["a.example/abc123", "ftp://a.example/abc123", "http://", "http://a.example", "http://a.example/", "http:///abc123"] {
            assert!(
                matches!(parse_remote_url(url), Err(Error::MalformedUrl(_))),
                "{url} should be malformed"
            );
        }
    }

    #[test]
    fn author_base_is_the_origin_through_the_domain() {
        assert_eq!(
            author_base("http://a.example/abc123").as_deref(),
            Some("http://a.example/")
        );
        assert_eq!(
            author_base("https://a.example:8080/abc123.json").as_deref(),
            Some("https://a.example:8080/")
        );
        assert_eq!(author_base("a.example/abc123"), None);
        assert_eq!(author_base("http://a.example"), None);
    }

    #[tokio::test]
    async fn sync_replicates_a_new_remote_post() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);

        let (listener, domain) = bind_remote().await;
        let mut remote = remote_fixture(&domain, "abc123", "hello #fed", at(5));
        remote.previous_shas = vec!["0ld".into()];
        serve_remote(listener, serde_json::to_value(&remote).unwrap());

        let merged = syncer.sync(&format!("http://{}/abc123", domain)).await.unwrap();
        assert_eq!(merged.guid, format!("{domain}/abc123"));
        assert_eq!(merged.body, "hello #fed");
        assert_eq!(merged.previous_shas, vec!["0ld".to_string()]);
        assert!(merged.tags.contains("fed"));
        assert!(merged.created_at.is_some());

        let stored = syncer.store().get(&merged.guid).unwrap().unwrap();
        assert_eq!(stored.sha, remote.sha);
        // the author's base address was recorded for future polling
        assert_eq!(
            syncer.peers().all().unwrap(),
            vec![format!("http://{domain}/")]
        );
    }

    #[tokio::test]
    async fn sync_last_writer_wins_by_edit_time() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);

        let (listener, domain) = bind_remote().await;
        let older = remote_fixture(&domain, "abc123", "older body", at(1));
        let newer = remote_fixture(&domain, "abc123", "newer body", at(30));
        serve_remote(listener, serde_json::to_value(&older).unwrap());

        let mut local = newer.clone();
        syncer.store().save(&mut local, None).unwrap();

        // remote is older: the local copy is returned unchanged
        let result = syncer.sync(&format!("http://{domain}/abc123")).await.unwrap();
        assert_eq!(result.body, "newer body");
        assert_eq!(result.sha, newer.sha);
    }

    #[tokio::test]
    async fn sync_merges_a_later_remote_over_local() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);

        let (listener, domain) = bind_remote().await;
        let mut local = remote_fixture(&domain, "abc123", "older body", at(1));
        let old_sha = local.sha.clone();
        let remote = remote_fixture(&domain, "abc123", "newer body", at(30));
        serve_remote(listener, serde_json::to_value(&remote).unwrap());

        syncer.store().save(&mut local, None).unwrap();
        let merged = syncer.sync(&format!("http://{domain}/abc123")).await.unwrap();
        assert_eq!(merged.body, "newer body");
        assert_eq!(merged.sha, remote.sha);
        // the superseded local hash joined the chain
        assert!(merged.previous_shas.contains(&old_sha));
        assert_eq!(merged.created_at, local.created_at);
    }

    #[tokio::test]
    async fn sync_rejects_a_mismatched_identity_triple() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);

        let (listener, domain) = bind_remote().await;
        // the served representation claims a different slug
        let imposter = remote_fixture(&domain, "xyz999", "hello", at(5));
        serve_remote(listener, serde_json::to_value(&imposter).unwrap());

        let err = syncer.sync(&format!("http://{domain}/abc123")).await.unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
        assert_eq!(syncer.store().all().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn sync_rejects_a_sha_that_does_not_match_the_body() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);

        let (listener, domain) = bind_remote().await;
        let mut remote = remote_fixture(&domain, "abc123", "hello", at(5));
        remote.sha = "0000feed".into();
        serve_remote(listener, serde_json::to_value(&remote).unwrap());

        let err = syncer.sync(&format!("http://{domain}/abc123")).await.unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
        assert!(syncer.store().all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_rejects_unknown_fields_in_the_payload() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);

        let (listener, domain) = bind_remote().await;
        let mut value =
            serde_json::to_value(remote_fixture(&domain, "abc123", "hello", at(5))).unwrap();
        value["surprise"] = serde_json::json!("gift");
        serve_remote(listener, value);

        let err = syncer.sync(&format!("http://{domain}/abc123")).await.unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
    }

    #[tokio::test]
    async fn sync_surfaces_network_failures() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);
        let err = syncer.sync("http://127.0.0.1:1/abc123").await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn malformed_urls_fail_before_any_fetch() {
        let dir = TempDir::new().unwrap();
        let syncer = syncer(&dir);
        let err = syncer.sync("gopher://a.example/abc123").await.unwrap_err();
        assert!(matches!(err, Error::MalformedUrl(_)));
    }

    #[tokio::test]
    async fn concurrent_syncs_of_one_new_post_converge() {
        let dir = TempDir::new().unwrap();
        let syncer = std::sync::Arc::new(syncer(&dir));

        let (listener, domain) = bind_remote().await;
        let remote = remote_fixture(&domain, "abc123", "hello", at(5));
        serve_remote(listener, serde_json::to_value(&remote).unwrap());

        let url = format!("http://{domain}/abc123");
        let mut handles = vec![];
        for _ in 0..4 {
            let syncer = syncer.clone();
            let url = url.clone();
            handles.push(tokio::spawn(async move { syncer.sync(&url).await }));
        }
        for handle in handles {
            let post = handle.await.unwrap().unwrap();
            assert_eq!(post.sha, remote.sha);
        }
        assert_eq!(syncer.store().all().unwrap().len(), 1);
    }
}

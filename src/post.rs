//! Post document model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolver::normalize_reference;

/// A versioned document owned by exactly one domain.
///
/// ```json
/// {
///   "guid": "a.example/abc123",
///   "domain": "a.example",
///   "slug": "abc123",
///   "url": "http://a.example/abc123",
///   "body": "hello #fediverse",
///   "body_html": "<p>hello #fediverse</p>",
///   "tags": ["fediverse"],
///   "sha": "d0b2...",
///   "previous_shas": [],
///   "published_at": "2026-01-01T00:00:00Z",
///   "edited_at": "2026-01-01T00:00:00Z",
///   "created_at": "2026-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Post {
    /// Globally unique identifier, `<domain>/<slug>`. Never changes after
    /// the first successful save.
    pub guid: String,
    /// Identifier of the owning node.
    pub domain: String,
    /// Six-character token unique across all posts, `[a-z]{3}[0-9]{3}`.
    pub slug: String,
    /// Canonical address; defaults to `http://<guid>`.
    pub url: String,
    /// Raw source text.
    pub body: String,
    /// Rendered form of `body`, recomputed whenever `body` changes.
    pub body_html: String,
    /// Lowercase tag set derived from the sanitized rendered body.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// GUID of the post this one replies to, stored without protocol. The
    /// target may not be replicated locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_guid: Option<String>,
    /// Content hash over `(guid, referenced_guid, body)`.
    pub sha: String,
    /// Every hash this post held before the current one, in save order.
    #[serde(default)]
    pub previous_shas: Vec<String>,
    /// Set on the first save, never overwritten.
    pub published_at: Option<DateTime<Utc>>,
    /// Refreshed whenever `body` changes.
    pub edited_at: Option<DateTime<Utc>>,
    /// Set by the store on insert.
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    /// A fresh, underived post; the pipeline fills in everything else.
    pub fn draft(domain: &str, body: &str) -> Self {
        Post {
            domain: domain.to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }

    /// Store a raw reference input, normalized. Empty input clears the
    /// reference.
    pub fn set_reference(&mut self, raw: &str) {
        self.referenced_guid = normalize_reference(raw);
    }

    /// Copy the replicable fields of a fetched representation into this
    /// post. Everything else (notably `created_at`) stays local.
    pub fn apply_remote(&mut self, remote: &RemotePost) {
        self.guid = remote.guid.clone();
        self.url = remote.url.clone();
        self.published_at = remote.published_at;
        self.edited_at = Some(remote.edited_at);
        self.referenced_guid = remote
            .referenced_guid
            .as_deref()
            .and_then(normalize_reference);
        self.body = remote.body.clone();
        self.body_html = remote.body_html.clone();
        self.domain = remote.domain.clone();
        self.slug = remote.slug.clone();
        self.sha = remote.sha.clone();
        self.previous_shas = remote.previous_shas.clone();
        self.tags = remote.tags.clone();
    }
}

/// Wire representation fetched from a remote node.
///
/// Decoding is field-by-field and rejects unknown fields instead of
/// silently ignoring them; [`Post::apply_remote`] copies exactly the fields
/// declared here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemotePost {
    pub guid: String,
    pub domain: String,
    pub slug: String,
    pub url: String,
    pub body: String,
    pub body_html: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub referenced_guid: Option<String>,
    pub sha: String,
    #[serde(default)]
    pub previous_shas: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub edited_at: DateTime<Utc>,
    /// Present when the remote is another pantr node; never copied.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

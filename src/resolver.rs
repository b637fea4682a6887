//! Reference normalization and reply-graph resolution.

use crate::{error::Result, post::Post, store::Store};

/// Normalize a raw reference input: trim whitespace, strip a leading
/// `http://` or `https://`, and treat the empty string as "no reference".
pub fn normalize_reference(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let stripped = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Resolves a post's back-reference and reply set against local storage.
///
/// A reference to a post that has not been replicated locally is a dangling
/// pointer, not an error: `reference` returns `None` for it.
pub struct Resolver<'a> {
    store: &'a Store,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// The referenced post, if it is available in local storage.
    pub fn reference(&self, post: &Post) -> Result<Option<Post>> {
        match post.referenced_guid.as_deref() {
            Some(guid) => self.store.get(guid),
            None => Ok(None),
        }
    }

    /// All locally stored posts whose reference names `guid`.
    pub fn replies(&self, guid: &str) -> Result<Vec<Post>> {
        self.store.replies(guid)
    }
}

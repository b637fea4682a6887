//! Identity and revision derivation: the pre-save pipeline for posts.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::{
    error::{Error, Result},
    markup::{BasicMarkup, HashTags, Markup, TagExtractor},
    post::Post,
};

/// Namespace prefix folded into every content hash.
const SHA_SALT: &str = "pants";

/// Content hash over a post's identity and body. Deterministic: identical
/// inputs always produce the identical digest.
pub fn calculate_sha(guid: &str, referenced_guid: Option<&str>, body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!(
        "{}:{}:{}:{}",
        SHA_SALT,
        guid,
        referenced_guid.unwrap_or(""),
        body
    ));
    hex::encode(hasher.finalize())
}

/// Sample a fresh slug: three lowercase letters followed by three digits.
pub fn generate_slug(rng: &mut impl Rng) -> String {
    let mut slug = String::with_capacity(6);
    for _ in 0..3 {
        slug.push(rng.gen_range(b'a'..=b'z') as char);
    }
    for _ in 0..3 {
        slug.push(rng.gen_range(b'0'..=b'9') as char);
    }
    slug
}

/// Pre-save pipeline computing every derived field of a post.
pub struct Deriver {
    markup: Box<dyn Markup>,
    tags: Box<dyn TagExtractor>,
}

impl Default for Deriver {
    fn default() -> Self {
        Deriver::new(Box::new(BasicMarkup), Box::new(HashTags))
    }
}

impl Deriver {
    pub fn new(markup: Box<dyn Markup>, tags: Box<dyn TagExtractor>) -> Self {
        Self { markup, tags }
    }

    /// Run the pipeline against `post`; `prior` holds the stored copy on
    /// updates. The order is load-bearing: tags need the rendered body, the
    /// guid needs the slug, and the sha needs the final guid and reference.
    pub fn prepare(
        &self,
        post: &mut Post,
        prior: Option<&Post>,
        rng: &mut impl Rng,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let body_changed = prior.map_or(true, |p| p.body != post.body);
        if body_changed {
            post.body_html = self.markup.render(&post.body)?;
            post.edited_at = Some(now);
        }

        let text = self.markup.plain_text(&post.body_html);
        post.tags = self
            .tags
            .extract(&text)
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();

        if post.slug.is_empty() {
            post.slug = generate_slug(rng);
        }
        post.guid = format!("{}/{}", post.domain, post.slug);

        if post.published_at.is_none() {
            post.published_at = Some(now);
        }
        if post.url.is_empty() {
            post.url = format!("http://{}", post.guid);
        }

        let sha = calculate_sha(&post.guid, post.referenced_guid.as_deref(), &post.body);
        if let Some(prior) = prior {
            remember_sha(post, prior, &sha);
        }
        post.sha = sha;
        Ok(())
    }
}

/// Append the superseded hash on update. Membership, not count, is tracked:
/// a reverted body re-derives an old hash without re-appending it.
fn remember_sha(post: &mut Post, prior: &Post, next_sha: &str) {
    if prior.sha != next_sha && !prior.sha.is_empty() && !post.previous_shas.contains(&prior.sha) {
        post.previous_shas.push(prior.sha.clone());
    }
}

/// Field-level checks performed at save time. Uniqueness is the store's job.
pub fn validate(post: &Post, prior: Option<&Post>) -> Result<()> {
    if post.body.is_empty() {
        return Err(Error::Validation("body can not be blank".into()));
    }
    for (name, value) in [("sha", &post.sha), ("slug", &post.slug), ("url", &post.url)] {
        if value.is_empty() {
            return Err(Error::Validation(format!("{name} can not be blank")));
        }
    }
    if let Some(prior) = prior {
        if prior.guid != post.guid {
            return Err(Error::Validation("guid can not be changed".into()));
        }
    }
    Ok(())
}

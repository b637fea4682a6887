//! Rendering and tag-extraction collaborators used by the save pipeline.

use crate::error::{Error, Result};

/// Renders raw body text into HTML and strips markup back to plain text.
pub trait Markup: Send + Sync {
    /// Render the raw body. Failures propagate to the caller unmasked.
    fn render(&self, body: &str) -> Result<String>;
    /// Sanitize rendered HTML down to plain text for tag extraction.
    fn plain_text(&self, html: &str) -> String;
}

/// Extracts tag candidates from sanitized plain text. Case folding and
/// deduplication happen in the pipeline, not here.
pub trait TagExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Paragraph-and-line-break formatter with HTML escaping.
pub struct BasicMarkup;

impl Markup for BasicMarkup {
    fn render(&self, body: &str) -> Result<String> {
        if body.contains('\u{0}') {
            return Err(Error::Render("body contains NUL bytes".into()));
        }
        let mut out = String::new();
        for para in body.split("\n\n").filter(|p| !p.trim().is_empty()) {
            out.push_str("<p>");
            for (i, line) in para.lines().enumerate() {
                if i > 0 {
                    out.push_str("<br>");
                }
                out.push_str(&escape(line));
            }
            out.push_str("</p>");
        }
        Ok(out)
    }

    fn plain_text(&self, html: &str) -> String {
        let mut text = String::new();
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => {
                    in_tag = true;
                    if !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
                '>' if in_tag => in_tag = false,
                c if !in_tag => text.push(c),
                _ => {}
            }
        }
        text.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&amp;", "&")
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Collects `#word` hashtags from plain text.
pub struct HashTags;

impl TagExtractor for HashTags {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut tags = vec![];
        for token in text.split_whitespace() {
            if let Some(rest) = token.strip_prefix('#') {
                let tag: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                    .collect();
                if !tag.is_empty() {
                    tags.push(tag);
                }
            }
        }
        tags
    }
}

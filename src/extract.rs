//! Asset discovery in arbitrary CMS JSON.
//!
//! The CMS hands us nested JSON whose schema we do not know. Discovery is
//! purely structural:
//!
//! - a **string** is a candidate when it carries an absolute URL scheme or a
//!   known root-relative upload prefix;
//! - an **object** is first classified as an [`AssetField`]. URL-bearing
//!   objects (`{ "url": .. }` or `{ "media": { "url": .. } }`) are taken as a
//!   whole and not descended into, so the same URL is not counted twice. All
//!   other objects are walked key by key;
//! - **arrays** are walked element by element.
//!
//! Keys along the path decide the category and role. Any ancestor key
//! containing a banner marker makes the reference a Banner. The nearest
//! ancestor key containing `desktop`, `mobile` or `video` assigns a role, and
//! the JSON pointer of the object holding that key becomes the group id, so
//! `{ "hero": { "desktop": .., "mobile": .. } }` yields two references in the
//! group `/hero`.
//!
//! Objects are walked in document order (`serde_json` keeps insertion order),
//! so the reference list follows the content as the editor wrote it.
//! Duplicates collapse to the first occurrence. Banner is sticky: a locator
//! seen once as Banner stays Banner even if it also appears elsewhere.

use crate::types::{AssetReference, Category, Role};
use serde_json::Value;
use std::collections::HashMap;

/// Result of looking at one JSON value for a URL-bearing shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetField {
    /// A candidate string, or an object with a candidate `url` field.
    DirectUrl(String),
    /// An object with a candidate `media.url` field.
    MediaWrapped(String),
    Missing,
}

impl AssetField {
    pub fn locator(&self) -> Option<&str> {
        match self {
            AssetField::DirectUrl(url) | AssetField::MediaWrapped(url) => Some(url),
            AssetField::Missing => None,
        }
    }
}

/// Rules for what counts as asset-like.
#[derive(Debug, Clone)]
pub struct ExtractRules {
    /// Root-relative prefixes that identify CMS uploads, e.g. `/uploads/`.
    pub upload_prefixes: Vec<String>,
    /// Lowercase substrings of object keys that mark a Banner subtree.
    pub banner_markers: Vec<String>,
}

impl Default for ExtractRules {
    fn default() -> Self {
        Self {
            upload_prefixes: vec!["/uploads/".to_string()],
            banner_markers: vec!["banner".to_string()],
        }
    }
}

impl ExtractRules {
    /// Whether a bare string looks like a media locator.
    pub fn is_candidate(&self, s: &str) -> bool {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return false;
        }
        has_url_scheme(s)
            || self
                .upload_prefixes
                .iter()
                .any(|prefix| s.starts_with(prefix.as_str()))
    }

    /// Classify a value. The only place that knows the URL-bearing shapes.
    pub fn classify(&self, value: &Value) -> AssetField {
        match value {
            Value::String(s) if self.is_candidate(s) => AssetField::DirectUrl(s.trim().to_string()),
            Value::Object(map) => {
                if let Some(Value::String(url)) = map.get("url")
                    && self.is_candidate(url)
                {
                    return AssetField::DirectUrl(url.trim().to_string());
                }
                if let Some(Value::Object(media)) = map.get("media")
                    && let Some(Value::String(url)) = media.get("url")
                    && self.is_candidate(url)
                {
                    return AssetField::MediaWrapped(url.trim().to_string());
                }
                AssetField::Missing
            }
            _ => AssetField::Missing,
        }
    }

    fn is_banner_key(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.banner_markers.iter().any(|m| key.contains(m.as_str()))
    }
}

fn has_url_scheme(s: &str) -> bool {
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || s.starts_with("//")
}

fn role_for_key(key: &str) -> Option<Role> {
    let key = key.to_ascii_lowercase();
    if key.contains("desktop") {
        Some(Role::Desktop)
    } else if key.contains("mobile") {
        Some(Role::Mobile)
    } else if key.contains("video") {
        Some(Role::Video)
    } else {
        None
    }
}

/// Escape a key for use as a JSON pointer segment (RFC 6901).
fn pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Path state carried down the walk.
#[derive(Debug, Clone, Default)]
struct Context {
    pointer: String,
    banner: bool,
    role: Option<(Role, String)>,
}

impl Context {
    fn enter_key(&self, rules: &ExtractRules, key: &str) -> Self {
        let role = match role_for_key(key) {
            Some(role) => Some((role, self.pointer.clone())),
            None => self.role.clone(),
        };
        Self {
            pointer: format!("{}/{}", self.pointer, pointer_segment(key)),
            banner: self.banner || rules.is_banner_key(key),
            role,
        }
    }

    fn enter_index(&self, index: usize) -> Self {
        Self {
            pointer: format!("{}/{}", self.pointer, index),
            ..self.clone()
        }
    }

    fn reference(&self, locator: &str) -> AssetReference {
        AssetReference {
            locator: locator.to_string(),
            category: if self.banner {
                Category::Banner
            } else {
                Category::Generic
            },
            role: self.role.as_ref().map(|(role, _)| *role),
            group: self.role.as_ref().map(|(_, group)| group.clone()),
        }
    }
}

/// Ordered, de-duplicating accumulator.
#[derive(Debug, Default)]
struct Collector {
    refs: Vec<AssetReference>,
    positions: HashMap<String, usize>,
}

impl Collector {
    fn push(&mut self, candidate: AssetReference) {
        match self.positions.get(&candidate.locator) {
            Some(&pos) => {
                let existing = &mut self.refs[pos];
                if candidate.category == Category::Banner {
                    existing.category = Category::Banner;
                }
                if existing.role.is_none() && candidate.role.is_some() {
                    existing.role = candidate.role;
                    existing.group = candidate.group;
                }
            }
            None => {
                self.positions
                    .insert(candidate.locator.clone(), self.refs.len());
                self.refs.push(candidate);
            }
        }
    }
}

fn walk(rules: &ExtractRules, value: &Value, ctx: &Context, out: &mut Collector) {
    if let Some(locator) = rules.classify(value).locator() {
        out.push(ctx.reference(locator));
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                walk(rules, child, &ctx.enter_key(rules, key), out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(rules, item, &ctx.enter_index(i), out);
            }
        }
        _ => {}
    }
}

/// Discover asset references in one JSON document.
pub fn extract(value: &Value, rules: &ExtractRules) -> Vec<AssetReference> {
    extract_many(std::slice::from_ref(value), rules)
}

/// Discover asset references across several documents, deduplicating
/// across all of them. Group ids are prefixed with the document index so
/// groups never span documents.
pub fn extract_many(values: &[Value], rules: &ExtractRules) -> Vec<AssetReference> {
    let mut out = Collector::default();
    for (doc, value) in values.iter().enumerate() {
        let ctx = Context {
            pointer: if values.len() > 1 {
                format!("#{doc}")
            } else {
                String::new()
            },
            ..Context::default()
        };
        walk(rules, value, &ctx, &mut out);
    }
    out.refs
}

//! Shared types used across all pipeline stages.
//!
//! References are produced by [`extract`](crate::extract), consumed by
//! [`store`](crate::store) and [`fallback`](crate::fallback), and stored
//! assets are what [`manifest`](crate::manifest) publishes. The serialized
//! forms appear in `.asset-index.json` and `asset-mapping.json`, so the
//! `serde` names are part of the on-disk format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery category of an asset. Decides conversion and freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Delivered unmodified and re-fetched on every run.
    Banner,
    /// Converted to WebP and cached indefinitely.
    Generic,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Banner => "banner",
            Category::Generic => "generic",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which slot of a responsive group a reference fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Desktop,
    Mobile,
    Video,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Desktop => "desktop",
            Role::Mobile => "mobile",
            Role::Video => "video",
        }
    }
}

/// One media locator discovered in CMS content.
///
/// Regenerated on every run; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReference {
    pub locator: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// JSON pointer of the object holding the role-bearing fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl AssetReference {
    pub fn generic(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            category: Category::Generic,
            role: None,
            group: None,
        }
    }

    pub fn banner(locator: impl Into<String>) -> Self {
        Self {
            category: Category::Banner,
            ..Self::generic(locator)
        }
    }

    /// Attach a role within a logical group.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>, role: Role) -> Self {
        self.group = Some(group.into());
        self.role = Some(role);
        self
    }
}

/// Deterministic, filesystem-safe identifier derived from a locator.
///
/// Constructed through [`resolve_key`](crate::keys::resolve_key), or from the
/// stem of a file found in an asset directory when building the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub(crate) fn from_raw(raw: String) -> Self {
        debug_assert!(!raw.is_empty());
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file that exists under one category directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub key: StorageKey,
    pub category: Category,
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_locator: Option<String>,
    pub converted: bool,
}

impl StoredAsset {
    /// File name inside the category directory: `<key>.<extension>`, or the
    /// bare key for a file without an extension.
    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.key.to_string()
        } else {
            format!("{}.{}", self.key, self.extension)
        }
    }
}

/// A Mobile slot served by the Desktop asset of the same group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackLink {
    pub primary: AssetReference,
    pub substitute: AssetReference,
}

impl FallbackLink {
    /// Group both sides belong to.
    pub fn group(&self) -> Option<&str> {
        self.primary.group.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Category::Banner).unwrap(),
            "\"banner\""
        );
        assert_eq!(
            serde_json::from_str::<Category>("\"generic\"").unwrap(),
            Category::Generic
        );
    }

    #[test]
    fn stored_asset_file_name() {
        let asset = StoredAsset {
            key: StorageKey::from_raw("abc".into()),
            category: Category::Generic,
            extension: "webp".into(),
            original_locator: None,
            converted: true,
        };
        assert_eq!(asset.file_name(), "abc.webp");
    }

    #[test]
    fn in_group_sets_role_and_group() {
        let r = AssetReference::banner("/uploads/m.jpg").in_group("/hero", Role::Mobile);
        assert_eq!(r.category, Category::Banner);
        assert_eq!(r.role, Some(Role::Mobile));
        assert_eq!(r.group.as_deref(), Some("/hero"));
    }
}

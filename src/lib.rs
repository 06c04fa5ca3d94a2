//! # sitepress
//!
//! Asset ingestion for a CMS-driven static marketing site. Content arrives as
//! JSON of unknown shape; somewhere inside it are references to images and
//! videos. sitepress finds them, downloads each once, normalizes images to
//! WebP, and publishes a manifest the site's templates use to turn a CMS
//! reference into a local, cacheable URL.
//!
//! # Architecture: Extract → Store → Publish
//!
//! ```text
//! 1. Extract   CMS JSON        →  AssetReference[]     (pure, no I/O)
//! 2. Store     references      →  public/assets/       (parallel, per asset)
//! 3. Publish   asset dirs      →  asset-mapping.json + asset-urls.js
//! ```
//!
//! Stage 3 reads the directories, not the run's results, so it can run on
//! its own (`sitepress manifest`) and always describes what is really there.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`extract`] | Finds locators in arbitrary JSON and classifies them (Banner/Generic, role, group) |
//! | [`keys`] | Locator → deterministic, filesystem-safe `StorageKey` |
//! | [`fetch`] | One-attempt HTTP download into a scoped temp file |
//! | [`convert`] | Ordered conversion chain to WebP, with a degraded copy as last resort |
//! | [`imaging`] | Format sniffing and the two conversion backends (`image` crate, ImageMagick) |
//! | [`store`] | Per-asset policy: reuse, refresh Banners, migrate reclassified files |
//! | [`index`] | Persisted record of which locator each stored file came from |
//! | [`fallback`] | Mobile slots that failed to download borrow their group's Desktop asset |
//! | [`manifest`] | Builds the mapping file and the alias lookup module |
//! | [`pipeline`] | Wires the stages together on a worker pool |
//! | [`config`] | `sitepress.toml` loading, merging over defaults, validation |
//! | [`types`] | Shared types: references, keys, stored assets |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Two Categories, Two Policies
//!
//! Banner assets (anything under a key containing `banner`) are marketing
//! visuals that editors swap often and expect pixel-exact. They are copied
//! verbatim and re-downloaded on every run. Everything else is Generic:
//! converted to WebP once and never fetched again while the file exists.
//!
//! ## Keys From Locators, Not Content
//!
//! A file's name is derived from its locator alone, so deciding whether an
//! asset is already stored needs no network round trip. The key is the
//! base64 of the locator with punctuation stripped, which keeps it readable
//! for debugging; see [`keys`].
//!
//! ## Never Drop an Asset
//!
//! If no backend can convert an image, the original bytes are kept under
//! their own extension and the run reports it as degraded. A broken page
//! image is worse than an unoptimized one.

pub mod config;
pub mod convert;
pub mod extract;
pub mod fallback;
pub mod fetch;
pub mod imaging;
pub mod index;
pub mod keys;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod store;
pub mod types;

//! # Sandbox Share
//!
//! Packs an HTML/CSS/JS sandbox (plus its presentation metadata) into a value
//! small enough for a URL query string, and unpacks it again on the preview
//! side.
//!
//! ```text
//! ContentRecord → compact → template::serialize → codec::encode → ?content=…
//!                                                              ↘ store → ?token=…
//! ?token / ?content / ?page → codec::decode → template::parse → Materializer
//! ```
//!
//! The codec is obfuscation only. Anyone holding a share URL can read its
//! content, and anything decoded here is meant to be executed as-is by the
//! preview page.

pub mod codec;
pub mod compact;
pub mod materialize;
pub mod page;
pub mod share;
pub mod store;
pub mod template;
pub mod utils;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::{Obfuscator, XorObfuscator};
pub use compact::{ContentCompactor, RecommendedAction, RegexCompactor, SizeEstimate};
pub use share::{open_share, share_record, ShareLink, Transport, ViewerQuery};
pub use store::{memory::MemoryTokenStore, TokenStore};

/// Key used when the caller does not supply one.
pub const DEFAULT_KEY: &str = "CodeSandbox2025";

/// Engine type used when a payload does not name one.
pub const DEFAULT_ENGINE_TYPE: &str = "default";

/// Fallback document title.
pub const DEFAULT_TITLE: &str = "CodeSandbox Preview";

/// Fallback document description.
pub const DEFAULT_DESCRIPTION: &str = "A code sandbox preview page";

// ---------------------------------------------------------------------------
// Script Kind
// ---------------------------------------------------------------------------

/// How the inline script is injected into the preview document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// Plain `<script>`.
    #[default]
    Classic,
    /// `<script type="module">`.
    Module,
}

impl ScriptKind {
    /// Attribute suffix for an opening `<script` tag.
    pub fn type_attr(self) -> &'static str {
        match self {
            ScriptKind::Classic => "",
            ScriptKind::Module => r#" type="module""#,
        }
    }
}

// ---------------------------------------------------------------------------
// Content Kind
// ---------------------------------------------------------------------------

/// Selects the compaction strategy for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Html,
    Css,
    Js,
    Generic,
}

impl std::str::FromStr for ContentKind {
    type Err = ShareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Ok(ContentKind::Html),
            "css" => Ok(ContentKind::Css),
            "js" | "javascript" => Ok(ContentKind::Js),
            "generic" | "text" => Ok(ContentKind::Generic),
            other => Err(ShareError::MalformedPayload(format!(
                "unknown content kind '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentRecord
// ---------------------------------------------------------------------------

/// The canonical shareable unit: one sandbox and its presentation metadata.
///
/// Records are built fresh from a decode and handed straight to a
/// [`materialize::Materializer`]; nothing mutates them afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentRecord {
    /// Presentation skin. Free-form tag.
    pub engine_type: String,
    /// Body fragment HTML.
    pub markup: String,
    pub style: String,
    pub script: String,
    pub script_kind: ScriptKind,
    /// Raw HTML appended to the document head.
    pub head_injections: String,
    /// Stylesheet URLs in apply order.
    pub style_links: Vec<String>,
    /// Script URLs in load order. All of them resolve before the inline script runs.
    pub script_links: Vec<String>,
    pub title: String,
    pub description: String,
}

impl Default for ContentRecord {
    fn default() -> Self {
        Self {
            engine_type: DEFAULT_ENGINE_TYPE.to_string(),
            markup: String::new(),
            style: String::new(),
            script: String::new(),
            script_kind: ScriptKind::Classic,
            head_injections: String::new(),
            style_links: Vec::new(),
            script_links: Vec::new(),
            title: DEFAULT_TITLE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

impl ContentRecord {
    /// Apply the record invariants: blank links dropped, empty engine type,
    /// title and description replaced by their fallbacks.
    pub fn normalized(mut self) -> Self {
        self.style_links = clean_links(self.style_links);
        self.script_links = clean_links(self.script_links);
        if self.engine_type.trim().is_empty() {
            self.engine_type = DEFAULT_ENGINE_TYPE.to_string();
        }
        if self.title.trim().is_empty() {
            self.title = DEFAULT_TITLE.to_string();
        }
        if self.description.trim().is_empty() {
            self.description = DEFAULT_DESCRIPTION.to_string();
        }
        self
    }
}

/// Trim link entries and drop the blank ones, keeping order.
pub fn clean_links<I, S>(links: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    links
        .into_iter()
        .map(|l| l.as_ref().trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// ShareSettings
// ---------------------------------------------------------------------------

/// Explicit configuration for both sides of an exchange.
///
/// Held by whoever drives the page (CLI, server, tests) and passed down;
/// the library keeps no global settings of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareSettings {
    /// Obfuscation key. Both sides must agree.
    pub key: String,
    /// Compact fields before encoding.
    pub compact: bool,
    /// Fields shorter than this (in UTF-16 code units) are left alone.
    pub compact_min_len: usize,
    /// Estimated encoded sizes above this must go through the token store.
    pub url_safe_limit: usize,
    /// Estimated encoded sizes above this get a warning.
    pub url_warning_threshold: usize,
    /// Base64 overhead applied to the compacted size.
    pub expansion_factor: f64,
    pub token_length: usize,
    #[serde(with = "duration_secs")]
    pub store_max_age: Duration,
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,
    /// Preview page that share URLs point at.
    pub preview_base: String,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            compact: true,
            compact_min_len: 100,
            url_safe_limit: 2048,
            url_warning_threshold: 1500,
            expansion_factor: 1.33,
            token_length: 8,
            store_max_age: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            settle_delay: Duration::from_millis(100),
            preview_base: "./previews/index.html".to_string(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// ShareError
// ---------------------------------------------------------------------------

/// Errors surfaced to callers.
///
/// Most of the pipeline degrades instead of failing; these are what is left
/// once every fallback has been tried.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Obfuscation key must not be empty")]
    InvalidKey,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Decode failed: {0}")]
    DecodeFailure(String),

    #[error("No stored payload for token '{0}' (missing, used or expired)")]
    StoreMiss(String),

    #[error("Failed to fetch '{location}': {reason}")]
    FetchFailure { location: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

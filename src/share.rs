//! Both ends of a share: turning a record into a link, and a link's query
//! back into a record.

use serde::Serialize;

use crate::codec;
use crate::compact::{estimate_share_size, ContentCompactor, RecommendedAction, SizeEstimate};
use crate::page::{decode_page_param, PageSource};
use crate::store::TokenStore;
use crate::template;
use crate::utils::utf16_len;
use crate::{ContentKind, ContentRecord, ShareError, ShareSettings};

// ---------------------------------------------------------------------------
// Author Side
// ---------------------------------------------------------------------------

/// How the payload travels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transport", content = "value", rename_all = "snake_case")]
pub enum Transport {
    /// `?content=<encoded payload>`
    Inline(String),
    /// `?token=<token>`, payload held by a [`TokenStore`].
    Token(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareLink {
    pub transport: Transport,
    pub estimate: SizeEstimate,
}

impl ShareLink {
    /// The query string, without the leading `?`.
    pub fn query(&self) -> String {
        // Both values are URL-safe as produced, so no further escaping.
        match &self.transport {
            Transport::Inline(value) => format!("content={value}"),
            Transport::Token(token) => format!("token={token}"),
        }
    }

    pub fn to_url(&self, base: &str) -> String {
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}{}", self.query())
    }
}

/// Compact each field with the strategy for its kind. Fields shorter than
/// `compact_min_len` are left alone, as is everything when compaction is off.
pub fn compact_record(
    record: &ContentRecord,
    settings: &ShareSettings,
    compactor: &dyn ContentCompactor,
) -> ContentRecord {
    let mut out = record.clone();
    if !settings.compact {
        return out;
    }
    let shrink = |field: &str, kind: ContentKind| {
        if utf16_len(field) < settings.compact_min_len {
            field.to_string()
        } else {
            compactor.compact(field, kind)
        }
    };
    out.markup = shrink(&record.markup, ContentKind::Html);
    out.head_injections = shrink(&record.head_injections, ContentKind::Html);
    out.style = shrink(&record.style, ContentKind::Css);
    out.script = shrink(&record.script, ContentKind::Js);
    out
}

/// Encode `record` for a share link, parking it in `store` when it is too
/// long to ride in the URL.
pub async fn share_record(
    record: &ContentRecord,
    store: &dyn TokenStore,
    settings: &ShareSettings,
    compactor: &dyn ContentCompactor,
) -> Result<ShareLink, ShareError> {
    let record = compact_record(&record.clone().normalized(), settings, compactor);
    let text = template::serialize(&record);
    let estimate = estimate_share_size(&text, settings);
    let encoded = codec::encode(&text, &settings.key)?;

    if estimate.recommended_action == RecommendedAction::SuggestAlternate {
        tracing::warn!(
            estimated = estimate.estimated_encoded_size,
            "{}",
            estimate.recommended_action.message()
        );
    }

    let encoded_len = utf16_len(&encoded);
    let transport = if estimate.is_too_long || encoded_len > settings.url_safe_limit {
        let token = store.put(encoded).await?;
        tracing::info!(
            %token,
            encoded_len,
            limit = settings.url_safe_limit,
            "payload too long for a URL, stored under token"
        );
        Transport::Token(token)
    } else {
        Transport::Inline(encoded)
    };

    Ok(ShareLink {
        transport,
        estimate,
    })
}

// ---------------------------------------------------------------------------
// Viewer Side
// ---------------------------------------------------------------------------

/// The preview page's query parameters. Blank values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerQuery {
    pub token: Option<String>,
    /// `content`, or its older alias `code`.
    pub content: Option<String>,
    pub page: Option<String>,
    /// `type`: overrides the payload's engine type.
    pub engine_type: Option<String>,
}

impl ViewerQuery {
    /// Parse a raw query string, with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut code = None;
        let mut out = ViewerQuery::default();

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match &*name {
                "token" => &mut out.token,
                "content" => &mut out.content,
                "code" => &mut code,
                "page" => &mut out.page,
                "type" => &mut out.engine_type,
                _ => continue,
            };
            // First occurrence wins, as with URLSearchParams::get.
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        if out.content.is_none() {
            out.content = code;
        }
        out
    }

    /// Parse the query of a full URL.
    pub fn from_url(url: &str) -> Result<Self, ShareError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ShareError::MalformedPayload(format!("invalid URL '{url}': {e}")))?;
        Ok(Self::from_query(parsed.query().unwrap_or_default()))
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.content.is_none() && self.page.is_none()
    }
}

/// Resolve a viewer query to a record.
///
/// Sources are tried as `token`, then `content`/`code`, then `page`. A token
/// that misses falls through to an inline payload when one is present and is
/// a [`ShareError::StoreMiss`] otherwise. `Ok(None)` means the query names no
/// payload at all.
pub async fn open_share(
    query: &ViewerQuery,
    store: &dyn TokenStore,
    pages: &dyn PageSource,
    settings: &ShareSettings,
) -> Result<Option<ContentRecord>, ShareError> {
    let mut record = None;

    if let Some(token) = &query.token {
        match store.take_once(token).await? {
            Some(payload) => record = Some(decode_payload(&payload, &settings.key)?),
            None if query.content.is_some() => {
                tracing::warn!(%token, "token missed, falling back to the inline payload");
            }
            None => return Err(ShareError::StoreMiss(token.clone())),
        }
    }

    if record.is_none() {
        if let Some(content) = &query.content {
            record = Some(decode_payload(content, &settings.key)?);
        }
    }

    if record.is_none() {
        if let Some(page) = &query.page {
            let location = decode_page_param(page);
            let text = pages.fetch(&location).await?;
            record = Some(template::parse(&text)?);
        }
    }

    let Some(mut record) = record else {
        tracing::debug!("no token, content or page parameter");
        return Ok(None);
    };
    if let Some(engine_type) = &query.engine_type {
        record.engine_type = engine_type.clone();
    }
    Ok(Some(record))
}

/// Decode then parse one encoded payload.
pub fn decode_payload(payload: &str, key: &str) -> Result<ContentRecord, ShareError> {
    let text = codec::decode(payload, key)?;
    template::parse(&text).map_err(|e| {
        tracing::error!(
            payload_len = payload.len(),
            decoded_len = text.len(),
            starts_with = ?text.trim_start().chars().next(),
            "decoded payload is not a record; key mismatch or corrupted data?"
        );
        e
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Applying a [`ContentRecord`] to a document.
//!
//! The live document belongs to whoever hosts the preview; this module only
//! fixes the order in which a record's fields land on it:
//!
//! 1. title, description meta tag, head fragment
//! 2. stylesheet links, then the inline style
//! 3. markup
//! 4. external scripts, one at a time, each awaited (failures tolerated)
//! 5. a settle delay, then the inline script
//!
//! [`HtmlDocument`] is a materializer that writes a stand-alone HTML file, and
//! [`render_engine_template`] fills an engine skin's `{{placeholders}}`.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::page::PageSource;
use crate::utils::escape_html_attr;
use crate::{clean_links, ContentRecord, ScriptKind, ShareError};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\{\s*([A-Za-z]+)\s*\}\}\}|\{\{\s*([A-Za-z]+)\s*\}\}").unwrap()
});

static ENGINE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

/// A document that record fields can be written onto.
#[async_trait]
pub trait Materializer: Send {
    fn set_title(&mut self, title: &str);
    /// Create the description meta tag or replace its content.
    fn upsert_description(&mut self, description: &str);
    fn append_head_html(&mut self, html: &str);
    fn append_stylesheet_link(&mut self, href: &str);
    fn append_inline_style(&mut self, css: &str);
    fn append_markup(&mut self, markup: &str);
    /// Resolves once the script has loaded or failed to.
    async fn load_script(&mut self, src: &str) -> Result<(), ShareError>;
    fn append_inline_script(&mut self, code: &str, kind: ScriptKind);
}

/// Outcome of the external script phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
}

/// Write `record` onto `doc` in document order.
///
/// The inline script is appended only after every script link has resolved
/// and `settle_delay` has elapsed, for libraries that finish initializing
/// asynchronously after their load event.
pub async fn materialize<M>(doc: &mut M, record: &ContentRecord, settle_delay: Duration) -> MaterializeReport
where
    M: Materializer + ?Sized,
{
    doc.set_title(&record.title);
    doc.upsert_description(&record.description);
    if !record.head_injections.trim().is_empty() {
        doc.append_head_html(&record.head_injections);
    }

    for href in clean_links(&record.style_links) {
        doc.append_stylesheet_link(&href);
    }
    if !record.style.is_empty() {
        doc.append_inline_style(&record.style);
    }
    if !record.markup.is_empty() {
        doc.append_markup(&record.markup);
    }

    let mut report = MaterializeReport::default();
    for src in clean_links(&record.script_links) {
        match doc.load_script(&src).await {
            Ok(()) => {
                tracing::debug!(%src, "script loaded");
                report.loaded.push(src);
            }
            Err(e) => {
                tracing::warn!(%src, error = %e, "script failed to load, continuing");
                report.failed.push(src);
            }
        }
    }
    if !report.failed.is_empty() {
        tracing::warn!(
            failed = report.failed.len(),
            total = report.loaded.len() + report.failed.len(),
            "some external scripts failed; running the inline script anyway"
        );
    }

    tokio::time::sleep(settle_delay).await;

    if !record.script.is_empty() {
        doc.append_inline_script(&record.script, record.script_kind);
    }
    report
}

// ---------------------------------------------------------------------------
// HtmlDocument
// ---------------------------------------------------------------------------

/// Builds a stand-alone HTML file.
#[derive(Debug, Clone, Default)]
pub struct HtmlDocument {
    title: String,
    description: Option<String>,
    head: Vec<String>,
    body: Vec<String>,
}

impl HtmlDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(&self) -> String {
        let mut html = String::from(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n    <meta charset=\"UTF-8\">\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        html.push_str(&format!("    <title>{}</title>\n", escape_html_attr(&self.title)));
        if let Some(description) = &self.description {
            html.push_str(&format!(
                "    <meta name=\"description\" content=\"{}\" />\n",
                escape_html_attr(description)
            ));
        }
        for part in &self.head {
            html.push_str(part);
            html.push('\n');
        }
        html.push_str("</head>\n<body>\n");
        for part in &self.body {
            html.push_str(part);
            html.push('\n');
        }
        html.push_str("</body>\n</html>\n");
        html
    }
}

#[async_trait]
impl Materializer for HtmlDocument {
    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn upsert_description(&mut self, description: &str) {
        self.description = Some(description.to_string());
    }

    fn append_head_html(&mut self, html: &str) {
        self.head.push(html.to_string());
    }

    fn append_stylesheet_link(&mut self, href: &str) {
        self.head.push(stylesheet_tag(href));
    }

    fn append_inline_style(&mut self, css: &str) {
        self.head.push(format!("<style>\n{css}\n</style>"));
    }

    fn append_markup(&mut self, markup: &str) {
        self.body.push(markup.to_string());
    }

    async fn load_script(&mut self, src: &str) -> Result<(), ShareError> {
        self.body.push(script_src_tag(src));
        Ok(())
    }

    fn append_inline_script(&mut self, code: &str, kind: ScriptKind) {
        self.body
            .push(format!("<script{}>\n{code}\n</script>", kind.type_attr()));
    }
}

fn stylesheet_tag(href: &str) -> String {
    format!(r#"<link rel="stylesheet" href="{}">"#, escape_html_attr(href))
}

fn script_src_tag(src: &str) -> String {
    format!(r#"<script src="{}"></script>"#, escape_html_attr(src))
}

/// The record as a complete HTML file, without any engine skin.
pub async fn render_document(record: &ContentRecord) -> String {
    let mut doc = HtmlDocument::new();
    materialize(&mut doc, record, Duration::ZERO).await;
    doc.finish()
}

// ---------------------------------------------------------------------------
// Engine Templates
// ---------------------------------------------------------------------------

/// Fill an engine skin.
///
/// `{{{name}}}` is replaced verbatim, `{{name}}` HTML-escaped. Known names:
/// `title`, `description`, `htmlContent`, `cssContent`, `jsContent`,
/// `headHtmlContent`, `cssLinks`, `jsLinks` (as ready-made tags) and `jsType`
/// (`module` or `text/javascript`). Unknown names render as nothing.
pub fn render_engine_template(template: &str, record: &ContentRecord) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let (name, raw) = match (caps.get(1), caps.get(2)) {
                (Some(name), _) => (name.as_str(), true),
                (_, Some(name)) => (name.as_str(), false),
                _ => return String::new(),
            };
            let value = template_value(name, record);
            if raw {
                value
            } else {
                escape_html_attr(&value)
            }
        })
        .into_owned()
}

fn template_value(name: &str, record: &ContentRecord) -> String {
    match name {
        "title" => record.title.clone(),
        "description" => record.description.clone(),
        "htmlContent" => record.markup.clone(),
        "cssContent" => record.style.clone(),
        "jsContent" => record.script.clone(),
        "headHtmlContent" => record.head_injections.clone(),
        "cssLinks" => clean_links(&record.style_links)
            .iter()
            .map(|l| stylesheet_tag(l))
            .collect::<Vec<_>>()
            .join("\n"),
        "jsLinks" => clean_links(&record.script_links)
            .iter()
            .map(|l| script_src_tag(l))
            .collect::<Vec<_>>()
            .join("\n"),
        "jsType" => match record.script_kind {
            ScriptKind::Module => "module".to_string(),
            ScriptKind::Classic => "text/javascript".to_string(),
        },
        other => {
            tracing::debug!(placeholder = other, "unknown template placeholder");
            String::new()
        }
    }
}

/// Render `record` through `<templates_base>/<engine>.html`, falling back to
/// [`render_document`] when the skin cannot be loaded.
pub async fn render_for_engine(
    record: &ContentRecord,
    source: &dyn PageSource,
    templates_base: &str,
) -> String {
    let engine = record.engine_type.trim();
    if !ENGINE_NAME.is_match(engine) {
        tracing::warn!(engine, "engine type is not a plain name, using the built-in document");
        return render_document(record).await;
    }

    let location = format!("{}/{engine}.html", templates_base.trim_end_matches('/'));
    match source.fetch(&location).await {
        Ok(template) => render_engine_template(&template, record),
        Err(e) => {
            tracing::warn!(%location, error = %e, "engine template unavailable, using the built-in document");
            render_document(record).await
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

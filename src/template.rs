//! Tagged-section payload format.
//!
//! A decoded payload is a small, self-describing text document:
//!
//! ```text
//! <engine-type>default</engine-type>
//! <title>…</title>
//! <meta name="description" content="…" />
//! <template>…</template>
//! <script type="module">…</script>
//! <style>…</style>
//! <settings>
//! <head-metadata>…</head-metadata>
//! <css-links>one URL per line</css-links>
//! <js-links>one URL per line</js-links>
//! </settings>
//! ```
//!
//! Sections are found by first-match, non-greedy delimiter search. Every
//! section is optional; section bodies are trimmed. Script and style are
//! searched with the template and settings blocks cut out, so markup or head
//! metadata carrying its own `<script>` or `<style>` tags does not shadow
//! them.
//!
//! Older payloads were JSON objects; those are accepted too.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::utils::{escape_html_attr, unescape_html_attr};
use crate::{clean_links, ContentRecord, ScriptKind, ShareError, DEFAULT_DESCRIPTION, DEFAULT_TITLE};

static ENGINE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<engine-type>(.*?)</engine-type>").unwrap());
static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<title>(.*?)</title>").unwrap());
static META_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta[^>]*name="description"[^>]*content="([^"]*)"[^>]*>"#).unwrap()
});
static TEMPLATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<template>(.*?)</template>").unwrap());
static SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<script(\s[^>]*)?>(.*?)</script>").unwrap());
static MODULE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\btype\s*=\s*["']?module\b"#).unwrap());
static STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<style>(.*?)</style>").unwrap());
static SETTINGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<settings>(.*?)</settings>").unwrap());
static HEAD_METADATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<head-metadata>(.*?)</head-metadata>").unwrap());
static CSS_LINKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<css-links>(.*?)</css-links>").unwrap());
static JS_LINKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<js-links>(.*?)</js-links>").unwrap());

/// Substrings that mark a script as an ES module when no explicit
/// `type="module"` is present. Heuristic: `const x = 1` in a classic script
/// is reported as a module too.
const MODULE_MARKERS: [&str; 4] = ["import ", "export ", "=>", "const "];

// ---------------------------------------------------------------------------
// Serialize
// ---------------------------------------------------------------------------

/// Render a record as a tagged-section document.
pub fn serialize(record: &ContentRecord) -> String {
    let title = non_blank_or(&record.title, DEFAULT_TITLE);
    let description = non_blank_or(&record.description, DEFAULT_DESCRIPTION);
    let engine_type = non_blank_or(&record.engine_type, crate::DEFAULT_ENGINE_TYPE);

    format!(
        r#"<engine-type>{engine}</engine-type>
<title>{title}</title>
<meta name="description" content="{description}" />
<template>
{markup}
</template>
<script{script_type}>
{script}
</script>
<style>
{style}
</style>
<settings>
<head-metadata>
{head}
</head-metadata>
<css-links>
{css_links}
</css-links>
<js-links>
{js_links}
</js-links>
</settings>
"#,
        engine = engine_type,
        title = title,
        description = escape_html_attr(description),
        markup = record.markup,
        script_type = record.script_kind.type_attr(),
        script = record.script,
        style = record.style,
        head = record.head_injections,
        css_links = clean_links(&record.style_links).join("\n"),
        js_links = clean_links(&record.script_links).join("\n"),
    )
}

fn non_blank_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Parse raw payload bytes. Fails only when they are not UTF-8 text or not
/// recognizably a payload at all.
pub fn parse_bytes(bytes: &[u8]) -> Result<ContentRecord, ShareError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ShareError::MalformedPayload(format!("payload is not UTF-8 text: {e}")))?;
    parse(text)
}

/// Parse a decoded payload into a record.
///
/// Missing sections fall back to their defaults. The only failure is input
/// that is neither a tagged document (`<…`) nor a legacy JSON payload
/// (`{…`/`[…`), which usually means the payload was decoded with the wrong key.
pub fn parse(text: &str) -> Result<ContentRecord, ShareError> {
    let trimmed = text.trim();
    match trimmed.chars().next() {
        Some('<') => Ok(parse_tagged(trimmed)),
        Some('{') | Some('[') => parse_legacy_json(trimmed),
        Some(other) => {
            tracing::warn!(
                len = text.len(),
                first = %other.escape_debug(),
                "decoded payload is neither tagged nor JSON"
            );
            Err(ShareError::MalformedPayload(format!(
                "unexpected leading character {:?}",
                other
            )))
        }
        None => Err(ShareError::MalformedPayload("payload is empty".into())),
    }
}

fn parse_tagged(text: &str) -> ContentRecord {
    let template = TEMPLATE.captures(text);
    let markup = template
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let after_template = template
        .as_ref()
        .and_then(|c| c.get(0))
        .map(|m| &text[m.end()..])
        .unwrap_or(text);

    // Script and style live outside both the markup and the settings block;
    // either may carry tags of its own.
    let top_level = without_first(&SETTINGS, &without_first(&TEMPLATE, text));

    let (script, explicit_module) = find_script(&top_level).unwrap_or_default();
    let script_kind = if explicit_module {
        ScriptKind::Module
    } else {
        detect_script_kind(&script)
    };

    let style = section(&STYLE, &top_level).unwrap_or_default();

    let (head_injections, style_links, script_links) =
        match section(&SETTINGS, after_template).or_else(|| section(&SETTINGS, text)) {
            Some(settings) => (
                section(&HEAD_METADATA, &settings).unwrap_or_default(),
                section(&CSS_LINKS, &settings)
                    .map(|s| clean_links(s.lines()))
                    .unwrap_or_default(),
                section(&JS_LINKS, &settings)
                    .map(|s| clean_links(s.lines()))
                    .unwrap_or_default(),
            ),
            None => (String::new(), Vec::new(), Vec::new()),
        };

    let description = META_DESCRIPTION
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| unescape_html_attr(m.as_str().trim()))
        .unwrap_or_default();

    let record = ContentRecord {
        engine_type: section(&ENGINE_TYPE, text).unwrap_or_default(),
        markup,
        style,
        script,
        script_kind,
        head_injections,
        style_links,
        script_links,
        title: section(&TITLE, text).unwrap_or_default(),
        description,
    }
    .normalized();

    tracing::debug!(
        engine_type = %record.engine_type,
        markup_len = record.markup.len(),
        style_len = record.style.len(),
        script_len = record.script.len(),
        ?script_kind,
        "parsed tagged payload"
    );
    record
}

fn section(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// `text` with the first match of `re` cut out.
fn without_first(re: &Regex, text: &str) -> String {
    match re.find(text) {
        Some(m) => format!("{}{}", &text[..m.start()], &text[m.end()..]),
        None => text.to_string(),
    }
}

/// First script tag: its trimmed body and whether it declares `type="module"`.
fn find_script(text: &str) -> Option<(String, bool)> {
    let caps = SCRIPT.captures(text)?;
    let explicit_module = caps
        .get(1)
        .is_some_and(|attrs| MODULE_TYPE.is_match(attrs.as_str()));
    let body = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
    Some((body, explicit_module))
}

/// Guess the script kind from its body. See [`MODULE_MARKERS`].
pub fn detect_script_kind(script: &str) -> ScriptKind {
    if MODULE_MARKERS.iter().any(|marker| script.contains(marker)) {
        ScriptKind::Module
    } else {
        ScriptKind::Classic
    }
}

// ---------------------------------------------------------------------------
// Legacy JSON payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyRecord {
    engine_type: String,
    html: String,
    css: String,
    js: String,
    head_html_content: String,
    css_links: Vec<String>,
    js_links: Vec<String>,
    title: String,
    description: String,
    js_type: String,
}

impl From<LegacyRecord> for ContentRecord {
    fn from(legacy: LegacyRecord) -> Self {
        let script_kind = if legacy.js_type.eq_ignore_ascii_case("module") {
            ScriptKind::Module
        } else {
            ScriptKind::Classic
        };
        ContentRecord {
            engine_type: legacy.engine_type,
            markup: legacy.html,
            style: legacy.css,
            script: legacy.js,
            script_kind,
            head_injections: legacy.head_html_content,
            style_links: legacy.css_links,
            script_links: legacy.js_links,
            title: legacy.title,
            description: legacy.description,
        }
        .normalized()
    }
}

fn parse_legacy_json(text: &str) -> Result<ContentRecord, ShareError> {
    let legacy: LegacyRecord = serde_json::from_str(text).map_err(|e| {
        tracing::warn!(len = text.len(), error = %e, "legacy JSON payload did not parse");
        ShareError::MalformedPayload(format!("invalid JSON payload: {e}"))
    })?;
    Ok(legacy.into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContentRecord {
        ContentRecord {
            engine_type: "default".into(),
            markup: "<p>hi</p>".into(),
            style: "p{color:red}".into(),
            script: "console.log(1)".into(),
            script_kind: ScriptKind::Classic,
            head_injections: String::new(),
            style_links: vec!["a.css".into()],
            script_links: vec![],
            title: "T".into(),
            description: "D".into(),
        }
    }

    #[test]
    fn serialize_layout() {
        let text = serialize(&sample());
        assert!(text.starts_with("<engine-type>default</engine-type>\n<title>T</title>"));
        assert!(text.contains(r#"<meta name="description" content="D" />"#));
        assert!(text.contains("<template>\n<p>hi</p>\n</template>"));
        assert!(text.contains("<script>\nconsole.log(1)\n</script>"));
        assert!(text.contains("<css-links>\na.css\n</css-links>"));
        assert!(text.contains("<js-links>\n\n</js-links>"));
    }

    #[test]
    fn serialize_module_script() {
        let record = ContentRecord {
            script: "import x from './x.js'".into(),
            script_kind: ScriptKind::Module,
            ..sample()
        };
        assert!(serialize(&record).contains(r#"<script type="module">"#));
    }

    #[test]
    fn roundtrip_scenario() {
        let record = sample();
        assert_eq!(parse(&serialize(&record)).unwrap(), record);
    }

    #[test]
    fn template_only_fills_defaults() {
        let record = parse("<template>X</template>").unwrap();
        assert_eq!(
            record,
            ContentRecord {
                markup: "X".into(),
                ..ContentRecord::default()
            }
        );
    }

    #[test]
    fn missing_settings_block_defaults() {
        let record = parse("<template>a</template><style>b{}</style>").unwrap();
        assert_eq!(record.style, "b{}");
        assert!(record.head_injections.is_empty());
        assert!(record.style_links.is_empty());
        assert!(record.script_links.is_empty());
    }

    #[test]
    fn links_drop_blank_lines() {
        let text = "<settings><css-links>\n  a.css \n\n   \nb.css\n</css-links><js-links>\n\n</js-links></settings>";
        let record = parse(text).unwrap();
        assert_eq!(record.style_links, vec!["a.css", "b.css"]);
        assert!(record.script_links.is_empty());
    }

    #[test]
    fn explicit_module_attribute_wins() {
        let record = parse(r#"<template></template><script type="module">foo()</script>"#).unwrap();
        assert_eq!(record.script_kind, ScriptKind::Module);
        assert_eq!(record.script, "foo()");
    }

    /// Known false positive: a classic script using `const` reads as a module.
    #[test]
    fn heuristic_marks_const_as_module() {
        let record = parse("<template></template><script>const a = 1;</script>").unwrap();
        assert_eq!(record.script_kind, ScriptKind::Module);
    }

    #[test]
    fn detect_script_kind_markers() {
        assert_eq!(detect_script_kind("import a from 'b'"), ScriptKind::Module);
        assert_eq!(detect_script_kind("export default 1"), ScriptKind::Module);
        assert_eq!(detect_script_kind("x.map(a => a)"), ScriptKind::Module);
        assert_eq!(detect_script_kind("var a = 1"), ScriptKind::Classic);
        assert_eq!(detect_script_kind(""), ScriptKind::Classic);
    }

    #[test]
    fn markup_script_does_not_shadow_script_section() {
        let record = ContentRecord {
            markup: "<div><script>inner()</script><style>.inner{}</style></div>".into(),
            script: "outer()".into(),
            style: ".outer{}".into(),
            ..sample()
        };
        let parsed = parse(&serialize(&record)).unwrap();
        assert_eq!(parsed.script, "outer()");
        assert_eq!(parsed.style, ".outer{}");
        assert_eq!(parsed.markup, record.markup);
    }

    #[test]
    fn head_module_script_does_not_shadow_script_section() {
        let record = ContentRecord {
            head_injections: r#"<script type="module">window.x = 1</script>"#.into(),
            ..sample()
        };
        assert_eq!(parse(&serialize(&record)).unwrap(), record);
    }

    #[test]
    fn head_style_does_not_shadow_style_section() {
        let record = ContentRecord {
            head_injections: "<style>.head{}</style>".into(),
            style: String::new(),
            ..sample()
        };
        assert_eq!(parse(&serialize(&record)).unwrap(), record);
    }

    #[test]
    fn first_script_tag_decides_kind() {
        let text = r#"<template></template><script>run()</script><script type="module">later()</script>"#;
        let record = parse(text).unwrap();
        assert_eq!(record.script, "run()");
        assert_eq!(record.script_kind, ScriptKind::Classic);

        let record = parse("<template></template><script type='module' defer>go()</script>").unwrap();
        assert_eq!(record.script_kind, ScriptKind::Module);
    }

    #[test]
    fn description_with_quotes_roundtrips() {
        let record = ContentRecord {
            description: r#"Say "hi" & <wave>"#.into(),
            ..sample()
        };
        assert_eq!(parse(&serialize(&record)).unwrap().description, record.description);
    }

    #[test]
    fn blank_title_and_engine_use_fallbacks() {
        let record = parse("<engine-type>  </engine-type><title></title><template>x</template>").unwrap();
        assert_eq!(record.engine_type, "default");
        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn legacy_json_payload() {
        let json = r##"{"engineType":"mars3d","html":"<div id=\"map\"></div>","css":"#map{}","js":"init()","jsType":"module","cssLinks":["a.css",""],"jsLinks":["lib.js"],"title":"Map"}"##;
        let record = parse(json).unwrap();
        assert_eq!(record.engine_type, "mars3d");
        assert_eq!(record.markup, r#"<div id="map"></div>"#);
        assert_eq!(record.script_kind, ScriptKind::Module);
        assert_eq!(record.style_links, vec!["a.css"]);
        assert_eq!(record.script_links, vec!["lib.js"]);
        assert_eq!(record.title, "Map");
        assert_eq!(record.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn broken_json_is_malformed() {
        assert!(matches!(parse("{not json"), Err(ShareError::MalformedPayload(_))));
        assert!(matches!(parse("[1, 2]"), Err(ShareError::MalformedPayload(_))));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(parse("\u{1b}\u{7}xq"), Err(ShareError::MalformedPayload(_))));
        assert!(matches!(parse("   "), Err(ShareError::MalformedPayload(_))));
    }

    #[test]
    fn parse_bytes_rejects_non_utf8() {
        assert!(matches!(parse_bytes(&[0xff, 0xfe]), Err(ShareError::MalformedPayload(_))));
        assert_eq!(parse_bytes(b"<template>x</template>").unwrap().markup, "x");
    }
}

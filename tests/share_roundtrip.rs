//! End-to-end: record → link → record, and the document built from it.

use std::time::Duration;

use pretty_assertions::assert_eq;
use sandbox_share::materialize::{materialize, render_document, HtmlDocument};
use sandbox_share::page::FsPageSource;
use sandbox_share::store::file::FileTokenStore;
use sandbox_share::{
    open_share, share_record, template, ContentRecord, MemoryTokenStore, RegexCompactor,
    ScriptKind, ShareError, ShareSettings, Transport, ViewerQuery, DEFAULT_DESCRIPTION,
    DEFAULT_TITLE,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scenario_record() -> ContentRecord {
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

fn long_record() -> ContentRecord {
    ContentRecord {
        markup: (0..600)
            .map(|i| format!("<li id=\"i{i}\">{i}</li>"))
            .collect(),
        script_links: vec!["https://cdn.example.com/lib.js".into()],
        ..scenario_record()
    }
}

// ===========================================================================
// Template Format
// ===========================================================================

#[test]
fn scenario_serialize_then_parse_is_identity() {
    let record = scenario_record();
    let parsed = template::parse(&template::serialize(&record)).unwrap();
    assert_eq!(parsed, record);
}

#[test]
fn template_only_document_fills_defaults() {
    let parsed = template::parse("<template>X</template>").unwrap();
    assert_eq!(
        parsed,
        ContentRecord {
            markup: "X".into(),
            ..Default::default()
        }
    );
    assert_eq!(parsed.engine_type, "default");
    assert_eq!(parsed.title, DEFAULT_TITLE);
    assert_eq!(parsed.description, DEFAULT_DESCRIPTION);
    assert_eq!(parsed.script_kind, ScriptKind::Classic);
}

// ===========================================================================
// Share / Open
// ===========================================================================

#[tokio::test]
async fn inline_link_reopens_to_same_record() {
    let settings = ShareSettings::default();
    let store = MemoryTokenStore::from_settings(&settings);
    let link = share_record(&scenario_record(), &store, &settings, &RegexCompactor)
        .await
        .unwrap();
    assert!(matches!(link.transport, Transport::Inline(_)));

    let query = ViewerQuery::from_query(&link.query());
    let opened = open_share(&query, &store, &FsPageSource::new(), &settings)
        .await
        .unwrap();
    assert_eq!(opened, Some(scenario_record()));
}

/// `share` and `open` in different processes meet through the store directory.
#[tokio::test]
async fn token_link_crosses_store_instances_once() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = ShareSettings::default();
    let author = FileTokenStore::from_settings(tmp.path(), &settings).await.unwrap();
    let viewer = FileTokenStore::from_settings(tmp.path(), &settings).await.unwrap();

    let link = share_record(&long_record(), &author, &settings, &RegexCompactor)
        .await
        .unwrap();
    assert!(matches!(link.transport, Transport::Token(_)));
    let url = link.to_url(&settings.preview_base);
    assert!(url.starts_with("./previews/index.html?token="));

    let query = ViewerQuery::from_query(&link.query());
    let pages = FsPageSource::new();
    let opened = open_share(&query, &viewer, &pages, &settings)
        .await
        .unwrap()
        .unwrap();
    // Markup is compacted on the way in, so compare what survives as-is.
    assert_eq!(opened.title, "T");
    assert_eq!(opened.script_links, vec!["https://cdn.example.com/lib.js"]);
    assert!(opened.markup.starts_with("<li id=\"i0\">0</li><li id=\"i1\">1</li>"));

    let again = open_share(&query, &viewer, &pages, &settings).await;
    assert!(matches!(again, Err(ShareError::StoreMiss(_))));
}

#[tokio::test]
async fn custom_key_must_match_on_both_sides() {
    let author = ShareSettings {
        key: "team-key".into(),
        ..Default::default()
    };
    let store = MemoryTokenStore::default();
    let link = share_record(&scenario_record(), &store, &author, &RegexCompactor)
        .await
        .unwrap();
    let query = ViewerQuery::from_query(&link.query());
    let pages = FsPageSource::new();

    let opened = open_share(&query, &store, &pages, &author).await.unwrap();
    assert_eq!(opened, Some(scenario_record()));

    let mismatched = open_share(&query, &store, &pages, &ShareSettings::default()).await;
    assert!(mismatched.is_err());
}

// ===========================================================================
// Materialize
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn opened_record_materializes_in_order() {
    let settings = ShareSettings::default();
    let store = MemoryTokenStore::default();
    let record = ContentRecord {
        script_links: vec!["lib.js".into()],
        ..scenario_record()
    };
    let link = share_record(&record, &store, &settings, &RegexCompactor)
        .await
        .unwrap();
    let opened = open_share(&ViewerQuery::from_query(&link.query()), &store, &FsPageSource::new(), &settings)
        .await
        .unwrap()
        .unwrap();

    let mut doc = HtmlDocument::new();
    let report = materialize(&mut doc, &opened, Duration::from_millis(100)).await;
    assert_eq!(report.loaded, vec!["lib.js"]);
    assert!(report.failed.is_empty());

    let html = doc.finish();
    assert_eq!(html, render_document(&opened).await);
    let lib = html.find("<script src=\"lib.js\"></script>").unwrap();
    let inline = html.find("console.log(1)").unwrap();
    assert!(lib < inline);
}

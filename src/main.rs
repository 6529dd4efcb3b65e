use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::EnvFilter;

use sandbox_share::compact::{compact, estimate_share_size};
use sandbox_share::materialize::{render_document, render_for_engine};
use sandbox_share::page::{AnyPageSource, FsPageSource};
use sandbox_share::store::file::FileTokenStore;
use sandbox_share::store::TokenStore;
use sandbox_share::{
    codec, open_share, share_record, template, ContentKind, ContentRecord, RegexCompactor,
    ShareSettings, ViewerQuery,
};

const USAGE: &str = "usage: sandbox-share <compact|estimate|encode|decode|serialize|parse|share|open|render> \
[--kind html|css|js|generic] [--key K] [--settings FILE] [--store-dir DIR] [--templates DIR]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Compact,
    Estimate,
    Encode,
    Decode,
    Serialize,
    Parse,
    Share,
    Open,
    Render,
}

impl Command {
    fn from_arg(arg: &str) -> Result<Self> {
        Ok(match arg {
            "compact" => Command::Compact,
            "estimate" => Command::Estimate,
            "encode" => Command::Encode,
            "decode" => Command::Decode,
            "serialize" => Command::Serialize,
            "parse" => Command::Parse,
            "share" => Command::Share,
            "open" => Command::Open,
            "render" => Command::Render,
            other => bail!("unknown command '{other}'. {USAGE}"),
        })
    }
}

#[derive(Debug)]
struct CliArgs {
    command: Command,
    kind: ContentKind,
    key: Option<String>,
    settings: Option<PathBuf>,
    store_dir: Option<PathBuf>,
    templates: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("[sandbox-share] {err:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let settings = load_settings(&args)?;

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;

    let output = match args.command {
        Command::Compact => compact(&input, args.kind),
        Command::Estimate => serde_json::to_string_pretty(&estimate_share_size(&input, &settings))?,
        Command::Encode => codec::encode(&input, &settings.key)?,
        Command::Decode => codec::decode(input.trim(), &settings.key)?,
        Command::Serialize => template::serialize(&read_record(&input)?),
        Command::Parse => serde_json::to_string_pretty(&template::parse(&input)?)?,
        Command::Share => {
            let store = open_store(&args, &settings).await?;
            let link = share_record(&read_record(&input)?, &store, &settings, &RegexCompactor).await?;
            link.to_url(&settings.preview_base)
        }
        Command::Open => {
            let store = open_store(&args, &settings).await?;
            let query = read_query(input.trim())?;
            let pages = AnyPageSource::new(FsPageSource::new());
            let record = open_share(&query, &store, &pages, &settings)
                .await?
                .ok_or_else(|| anyhow!("query has no token, content or page parameter"))?;
            serde_json::to_string_pretty(&record)?
        }
        Command::Render => {
            let record = read_record(&input)?.normalized();
            match &args.templates {
                Some(base) => {
                    let pages = AnyPageSource::new(FsPageSource::new());
                    render_for_engine(&record, &pages, base).await
                }
                None => render_document(&record).await,
            }
        }
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs> {
    let command = args.next().ok_or_else(|| anyhow!("missing command. {USAGE}"))?;
    let mut parsed = CliArgs {
        command: Command::from_arg(&command)?,
        kind: ContentKind::Generic,
        key: None,
        settings: None,
        store_dir: None,
        templates: None,
    };

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match arg.as_str() {
            "--kind" => parsed.kind = value("--kind")?.parse()?,
            "--key" => parsed.key = Some(value("--key")?),
            "--settings" => parsed.settings = Some(PathBuf::from(value("--settings")?)),
            "--store-dir" => parsed.store_dir = Some(PathBuf::from(value("--store-dir")?)),
            "--templates" => parsed.templates = Some(value("--templates")?),
            _ => bail!("unknown argument '{arg}'. {USAGE}"),
        }
    }
    Ok(parsed)
}

fn load_settings(args: &CliArgs) -> Result<ShareSettings> {
    let mut settings = match &args.settings {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings '{}'", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid settings JSON '{}'", path.display()))?
        }
        None => ShareSettings::default(),
    };
    if let Some(key) = &args.key {
        settings.key = key.clone();
    }
    Ok(settings)
}

/// Token entries live on disk so `share` and `open` can run as separate
/// processes.
async fn open_store(args: &CliArgs, settings: &ShareSettings) -> Result<FileTokenStore> {
    let dir = args
        .store_dir
        .clone()
        .unwrap_or_else(|| env::temp_dir().join("sandbox-share"));
    let store = FileTokenStore::from_settings(&dir, settings)
        .await
        .with_context(|| format!("failed to open token store '{}'", dir.display()))?;
    let removed = store.sweep().await?;
    if removed > 0 {
        tracing::debug!(removed, "swept stale tokens");
    }
    Ok(store)
}

fn read_record(input: &str) -> Result<ContentRecord> {
    serde_json::from_str(input).context("invalid record JSON")
}

/// Accepts a full URL or a bare query string.
fn read_query(input: &str) -> Result<ViewerQuery> {
    if input.contains("://") {
        Ok(ViewerQuery::from_url(input)?)
    } else {
        let query = input.rsplit_once('?').map_or(input, |(_, q)| q);
        Ok(ViewerQuery::from_query(query))
    }
}

//! 🚀 bulkport-cli: the front door. Loads config, sets up logging, runs one
//! import against an in-memory CRM, and prints how it went.
//!
//! 🎬 *[narrator voice]* "It all started with a CSV somebody swore was clean..."

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bulkport::backends::{LocalFileSource, RowSource};
use bulkport::common::{ContentType, ImportCreateContent, ImportUser, RowBatch, UploadType};
use bulkport::fields::{FieldProperty, build_document, check_field_names};
use bulkport::history::{HistoryStore, ImportHistory, InMemoryHistoryStore, JsonFileHistoryStore};
use bulkport::store::InMemoryEntityStore;
use bulkport::streamer::{BatchHandler, BatchStreamer};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bulkport", about = "📥 Stream a CSV upload into the CRM, 500 rows at a time")]
struct Cli {
    /// TOML config. Missing file = env vars and defaults only.
    #[arg(long, global = true, default_value = "bulkport.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import one CSV file and wait for it to finish.
    Import {
        /// File name, relative to the uploads folder (or the S3 key).
        #[arg(long)]
        file: String,
        #[arg(long = "type", value_parser = parse_content_type)]
        content_type: ContentType,
        #[arg(long, value_enum, default_value_t = UploadArg::Local)]
        upload_type: UploadArg,
        /// CSV of records that already exist, for the duplicate checks.
        #[arg(long)]
        existing: Option<PathBuf>,
        /// Keep histories in this JSON file instead of memory.
        #[arg(long)]
        history: Option<PathBuf>,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long = "brand")]
        brands: Vec<String>,
    },
    /// List the histories kept in a JSON history file.
    History {
        #[arg(long)]
        history: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UploadArg {
    Local,
    Aws,
}

impl From<UploadArg> for UploadType {
    fn from(arg: UploadArg) -> Self {
        match arg {
            UploadArg::Local => UploadType::Local,
            UploadArg::Aws => UploadType::Aws,
        }
    }
}

fn parse_content_type(raw: &str) -> Result<ContentType, String> {
    raw.parse().map_err(|e: anyhow::Error| e.to_string())
}

/// 🌱 Feeds a CSV of pre-existing records into the in-memory store.
///
/// Headers resolve the same way an import's do, so `PrimaryEmail` seeds `primaryEmail`.
struct SeedHandler {
    store: InMemoryEntityStore,
    content_type: ContentType,
    properties: Option<Vec<FieldProperty>>,
    seeded: usize,
}

impl SeedHandler {
    fn new(store: InMemoryEntityStore, content_type: ContentType) -> Self {
        Self {
            store,
            content_type,
            properties: None,
            seeded: 0,
        }
    }
}

#[async_trait]
impl BatchHandler for SeedHandler {
    async fn handle_batch(&mut self, batch: RowBatch, _total_rows: u64) -> Result<()> {
        let Some(the_first) = batch.rows.first() else {
            return Ok(());
        };
        if self.properties.is_none() {
            self.properties = Some(check_field_names(self.content_type, the_first.field_names())?);
        }
        let the_properties = self.properties.as_deref().unwrap_or_default();
        for row in batch.rows {
            let the_doc = build_document(the_properties, row.values());
            self.store.seed(self.content_type, the_doc).await;
            self.seeded += 1;
        }
        Ok(())
    }
}

async fn seed_store(store: &InMemoryEntityStore, content_type: ContentType, path: &Path) -> Result<()> {
    let the_source = LocalFileSource::new(path);
    let the_opened = the_source.open_counted().await?;
    let mut the_handler = SeedHandler::new(store.clone(), content_type);
    BatchStreamer::new(500, 1)
        .run(the_source.label(), the_opened, &mut the_handler)
        .await
        .with_context(|| format!("💀 Could not seed existing records from '{}'", path.display()))?;
    info!("🌱 seeded {} existing {} records", the_handler.seeded, content_type);
    Ok(())
}

fn print_histories(histories: &[ImportHistory]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Id", "Type", "Date", "Status", "Total", "Success", "Failed", "%"]);
    for history in histories {
        table.add_row(vec![
            Cell::new(&history.id),
            Cell::new(history.content_type),
            Cell::new(history.date.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(history.status),
            Cell::new(history.total).set_alignment(CellAlignment::Right),
            Cell::new(history.success).set_alignment(CellAlignment::Right),
            Cell::new(history.failed).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", history.percentage)).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");

    for history in histories.iter().filter(|h| !h.error_msgs.is_empty()) {
        println!("⚠️  {} rejected rows of {}:", history.error_msgs.len(), history.id);
        for msg in &history.error_msgs {
            println!("   - {msg}");
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let the_config_file = match cli
        .config
        .try_exists()
        .with_context(|| format!("💀 Could not check for config file '{}'", cli.config.display()))?
    {
        true => Some(cli.config.as_path()),
        false => None,
    };
    let app_config = bulkport::app_config::load_config(the_config_file)
        .context("💀 Could not load the configuration. Check the TOML and the BULKPORT_* env vars.")?;

    match cli.command {
        Command::Import {
            file,
            content_type,
            upload_type,
            existing,
            history,
            user,
            brands,
        } => {
            let the_store = InMemoryEntityStore::new();
            if let Some(ref path) = existing {
                seed_store(&the_store, content_type, path).await?;
            }
            let the_history: Arc<dyn HistoryStore> = match history {
                Some(ref path) => Arc::new(JsonFileHistoryStore::open(path).await?),
                None => Arc::new(InMemoryHistoryStore::new()),
            };

            let the_result = bulkport::run(
                app_config,
                Arc::new(the_store),
                the_history,
                ImportCreateContent {
                    file_name: file,
                    content_type,
                    scope_brand_ids: brands,
                    user: ImportUser {
                        id: user,
                        username: None,
                        email: None,
                    },
                    upload_type: upload_type.into(),
                    file_type: "csv".to_string(),
                },
            )
            .await?;
            print_histories(std::slice::from_ref(&the_result));
        }
        Command::History { history } => {
            let the_store = JsonFileHistoryStore::open(&history).await?;
            print_histories(&the_store.list().await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, one layer at a time
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
        }
        std::process::exit(1);
    }
    Ok(())
}

//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the uploads folder. Nothing." -- every on-call at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::S3Config;

/// 📦 The AppConfig: one struct to rule them all.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// 📥 How imports chunk, where local uploads live, how picky validation is.
    #[serde(default)]
    pub import: ImportConfig,
    /// 🪣 Remote object storage. Absent = local uploads only.
    #[serde(default)]
    pub storage: Option<S3Config>,
    /// 🧵 Pipeline plumbing knobs.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 📥 Import-level knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// 📦 Rows per batch, and ids per removal chunk. The bulk limit.
    #[serde(default = "default_bulk_limit")]
    pub bulk_limit: usize,
    /// 📂 Local uploads land at `<uploads_folder>/<file_name>`.
    #[serde(default = "default_uploads_folder")]
    pub uploads_folder: PathBuf,
    /// ⚠️ When false (the default), empty values never count as duplicates.
    /// Flip it on to get the old behavior where two rows missing a phone
    /// collide with each other and with every phone-less record in the db.
    #[serde(default)]
    pub flag_empty_duplicates: bool,
}

// 📦 500 rows: big enough to amortize a round trip, small enough to validate in a blink
fn default_bulk_limit() -> usize {
    500
}

fn default_uploads_folder() -> PathBuf {
    PathBuf::from("uploads")
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            bulk_limit: default_bulk_limit(),
            uploads_folder: default_uploads_folder(),
            flag_empty_duplicates: false,
        }
    }
}

/// 🧵 Runtime knobs for the streamer plumbing.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// ✉️ Parsed batches allowed to wait between the CSV reader and the batch
    /// handler. The handler still only ever runs one batch at a time.
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
    /// 📊 Draw an indicatif progress bar while streaming.
    #[serde(default)]
    pub show_progress: bool,
}

fn default_queue_capacity() -> usize {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            show_progress: false,
        }
    }
}

/// 🚀 Load the config from a file, from env vars, or from the sheer power of hoping.
///
/// Layers, later wins:
///   1. bare `AWS_BUCKET`, mapped onto `storage.bucket`
///   2. `BULKPORT_*` env vars, `__` separates nesting (`BULKPORT_IMPORT__BULK_LIMIT=100`)
///   3. the TOML file, if one was given
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new()
        .merge(
            Env::raw()
                .only(&["AWS_BUCKET"])
                .map(|_| "storage.bucket".into()),
        )
        .merge(Env::prefixed("BULKPORT_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BULKPORT_*). \
             The file exists in our hearts, but apparently not in a shape serde likes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BULKPORT_*). \
                 No file was provided, this one's all on the environment."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    if app_config.import.bulk_limit == 0 {
        anyhow::bail!("💀 import.bulk_limit must be at least 1. A batch of zero rows is a philosophy, not a batch.");
    }
    Ok(app_config)
}

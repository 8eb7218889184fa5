//! 🪣📡 S3 Source: the upload lives in a bucket, and we'd like it back please.
//!
//! COLD OPEN. EXT. DATA CENTER, 3:47 AM
//!
//! A sales ops lead uploaded 200k leads through the browser. The browser put
//! them in S3. Now a Rust process has to count them without downloading them
//! twice, then stream them without downloading them all at once.
//!
//! 🧠 Knowledge graph:
//! - Count: S3 Select `SELECT COUNT(*) FROM S3Object` with `FileHeaderInfo=USE`,
//!   so the header is already excluded server-side. The answer arrives as CSV
//!   text inside Records events.
//! - Stream: `GetObject` → `ByteStream::into_async_read()` → boxed `AsyncRead`
//! - Delete: `DeleteObject` once the import is Done
//! - Transport errors are fatal for the import. No retries. The caller decides.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::types::{
    CsvInput, CsvOutput, ExpressionType, FileHeaderInfo, InputSerialization, OutputSerialization,
    SelectObjectContentEventStream,
};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::{CsvReader, RowSource};

const COUNT_EXPRESSION: &str = "SELECT COUNT(*) FROM S3Object";

/// 🔧 Where uploads live remotely. Co-located with the backend that uses it.
#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    /// 🪣 The bucket name. Env fallback: `AWS_BUCKET`.
    pub bucket: String,
    /// 🌎 Defaults to us-east-1, the Florida of AWS regions.
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// 🏠 Custom endpoint for S3-compatible stores (minio, localstack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// 🛣️ Path-style addressing, which most S3-compatible stores want.
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

/// 🪣 One uploaded object in one bucket.
pub struct S3Source {
    client: aws_sdk_s3::Client,
    config: S3Config,
    key: String,
}

// 🐛 Client is excluded: it does not care to be Debug-printed, and nobody wants its internals anyway.
impl std::fmt::Debug for S3Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Source")
            .field("config", &self.config)
            .field("key", &self.key)
            .finish()
    }
}

impl S3Source {
    /// 🚀 Build an SDK client from the environment (env vars → ~/.aws → IAM role → hope).
    pub async fn new(config: S3Config, key: String) -> Result<Self> {
        let mut the_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(ref endpoint) = config.endpoint_url {
            the_loader = the_loader.endpoint_url(endpoint);
        }
        let the_sdk_config = the_loader.load().await;

        let the_s3_config = aws_sdk_s3::config::Builder::from(&the_sdk_config)
            .force_path_style(config.force_path_style)
            .build();
        let client = aws_sdk_s3::Client::from_conf(the_s3_config);

        Ok(Self {
            client,
            config,
            key,
        })
    }

    fn uri(&self) -> String {
        format!("s3://{}/{}", self.config.bucket, self.key)
    }
}

/// 🔢 S3 Select answers `COUNT(*)` with one CSV cell, possibly split across events.
pub(crate) fn parse_select_count(payload: &str) -> Result<u64> {
    let the_cell = payload.trim();
    if the_cell.is_empty() {
        // -- 📭 no Records event at all: the object had no data rows
        return Ok(0);
    }
    the_cell.parse::<u64>().with_context(|| {
        format!("💀 S3 Select answered COUNT(*) with '{the_cell}', which is not a number")
    })
}

#[async_trait]
impl RowSource for S3Source {
    async fn count_rows(&self) -> Result<u64> {
        let the_input = InputSerialization::builder()
            .csv(
                CsvInput::builder()
                    .file_header_info(FileHeaderInfo::Use)
                    .record_delimiter("\n")
                    .field_delimiter(",")
                    .build(),
            )
            .build();
        let the_output = OutputSerialization::builder()
            .csv(CsvOutput::builder().build())
            .build();

        let mut the_response = self
            .client
            .select_object_content()
            .bucket(&self.config.bucket)
            .key(&self.key)
            .expression_type(ExpressionType::Sql)
            .expression(COUNT_EXPRESSION)
            .input_serialization(the_input)
            .output_serialization(the_output)
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 S3 Select refused to count {}. Check bucket, key, region and credentials.",
                    self.uri()
                )
            })?;

        let mut the_payload = String::new();
        while let Some(event) = the_response
            .payload
            .recv()
            .await
            .with_context(|| format!("💀 S3 Select event stream for {} broke mid-count", self.uri()))?
        {
            match event {
                SelectObjectContentEventStream::Records(records) => {
                    if let Some(blob) = records.payload() {
                        the_payload.push_str(&String::from_utf8_lossy(blob.as_ref()));
                    }
                }
                SelectObjectContentEventStream::End(_) => break,
                other => trace!("🪣 ignoring S3 Select event {:?}", other),
            }
        }

        parse_select_count(&the_payload)
    }

    async fn open(&self) -> Result<CsvReader> {
        let the_object = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&self.key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 GetObject failed for {}. The bucket ghosted us. \
                     Check: IAM permissions, bucket policy, KMS key access.",
                    self.uri()
                )
            })?;

        debug!("🪣 streaming {}", self.uri());
        Ok(Box::new(the_object.body.into_async_read()))
    }

    async fn delete_source(&self) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&self.key)
            .send()
            .await
            .with_context(|| format!("💀 DeleteObject failed for {}", self.uri()))?;
        debug!("🗑️ deleted finished upload {}", self.uri());
        Ok(())
    }

    fn label(&self) -> String {
        self.uri()
    }
}

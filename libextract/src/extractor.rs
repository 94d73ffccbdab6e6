use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unknown extractor `{0}`")]
    UnknownExtractor(String),
    #[error("table `{table}` has two producers: `{first}` and `{second}`")]
    DuplicateProducer {
        table: String,
        first: String,
        second: String,
    },
    #[error("invalid options for extractor `{extractor}`: {reason}")]
    InvalidOptions { extractor: String, reason: String },
    #[error(transparent)]
    Graph(#[from] libdag::GraphError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Per-extractor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractorConfig {
    pub name: String,
    #[serde(default)]
    pub opts: serde_json::Value,
    /// Whether the features-updated topic is published even when the
    /// extraction failed.
    #[serde(default)]
    pub publish_on_error: bool,
}

impl ExtractorConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: serde_json::Value::Null,
            publish_on_error: false,
        }
    }
}

/// A named unit that transforms upstream tables into one derived feature
/// table.
///
/// An extractor is the sole writer of its table. Each extraction writes in
/// a single transaction, either replacing the whole contents or upserting
/// by primary key, so readers observe the previous or the new contents but
/// never a partial state. Extraction is idempotent over unchanged inputs.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// The feature table this extractor owns.
    fn table(&self) -> &str;

    /// Sync topics whose publication makes this extractor's inputs stale.
    fn triggers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of extractors whose feature tables this extractor reads.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Creates the feature table if missing and decodes the options blob.
    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), ExtractError>;

    /// Runs one extraction and returns the number of feature rows written.
    async fn extract(&self) -> Result<u64, ExtractError>;
}

/// Decodes an extractor's options blob, rejecting unknown fields.
pub fn decode_opts<T: serde::de::DeserializeOwned>(
    extractor: &str,
    opts: &serde_json::Value,
) -> Result<T, ExtractError> {
    let value = if opts.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        opts.clone()
    };
    serde_json::from_value(value).map_err(|e| ExtractError::InvalidOptions {
        extractor: extractor.to_string(),
        reason: e.to_string(),
    })
}

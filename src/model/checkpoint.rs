use crate::basis::LedgerContext;
use chrono::Utc;
use ron::{de::SpannedError, ser::PrettyConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const CHECKPOINT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Unable to deserialize")]
    Deserialize(#[from] SpannedError),

    #[error("Unable to serialize")]
    Serialize(#[from] ron::Error),

    #[error("Expected version `{CHECKPOINT_VERSION}`, found `{0}`")]
    Version(String),
}

/// Header for checkpoints.
#[derive(Debug, Deserialize, Serialize)]
pub struct CheckpointHeader {
    /// When the checkpoint was saved.
    pub time: String,

    /// Checkpoint version.
    pub semver: String,

    /// Timestamp of the most recent transaction processed.
    pub latest_row_time: Option<String>,
}

impl Default for CheckpointHeader {
    fn default() -> Self {
        Self {
            time: Utc::now().to_rfc3339(),
            semver: CHECKPOINT_VERSION.to_string(),
            latest_row_time: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Checkpoint {
    header: CheckpointHeader,
    context: LedgerContext,
}

impl LedgerContext {
    /// Load a context saved by [`LedgerContext::save`].
    ///
    /// The ledgers continue exactly where the saved run stopped. Transactions fed to it must not be
    /// older than the last one processed before saving.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let serialized = std::fs::read_to_string(path)?;
        let checkpoint: Checkpoint = ron::from_str(&serialized)?;

        // Validate header.
        if checkpoint.header.semver == CHECKPOINT_VERSION {
            Ok(checkpoint.context)
        } else {
            Err(CheckpointError::Version(checkpoint.header.semver))
        }
    }

    /// Save the context to the given path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        let header = CheckpointHeader {
            latest_row_time: self.classifier.last_time().map(|time| time.to_rfc3339()),
            ..Default::default()
        };
        let checkpoint = Checkpoint {
            header,
            context: self.clone(),
        };
        let serialized = ron::ser::to_string_pretty(&checkpoint, PrettyConfig::default())?;

        std::fs::write(path, serialized)?;

        Ok(())
    }
}

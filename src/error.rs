// error.rs

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure kinds surfaced by the heatmap pipeline.
#[derive(Debug, Error)]
pub enum HeatmapError {
    /// Malformed input: missing columns, non-numeric samples, duplicate genes,
    /// or an invalid palette / color scale.
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// Degenerate clustering input or a drawing backend failure.
    #[error("Render error: {0}")]
    Render(String),

    /// Unreadable input or unwritable output.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HeatmapError {
    pub fn data_format(msg: impl Into<String>) -> Self {
        HeatmapError::DataFormat(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        HeatmapError::Render(msg.into())
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        HeatmapError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Wraps a non-`io::Error` failure that happened while touching `path`.
    pub fn io_other(path: &Path, msg: impl Into<String>) -> Self {
        HeatmapError::Io {
            path: path.to_path_buf(),
            source: io::Error::other(msg.into()),
        }
    }
}

pub type HeatmapResult<T> = Result<T, HeatmapError>;

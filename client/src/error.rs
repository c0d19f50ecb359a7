//! Error types for the wall engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WallError>;

#[derive(Debug, Error)]
pub enum WallError {
    /// Configuration rejected by `WallConfig::validate`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tile key string that is not of the form `x,y,lod`.
    #[error("malformed tile key {0:?}")]
    MalformedKey(String),

    /// Network request failed or returned a non-success status.
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to decode tile image: {0}")]
    Decode(#[from] image::ImageError),

    /// The loader's execution context could not be started or has gone away.
    #[error("tile loader unavailable: {0}")]
    LoaderUnavailable(String),
}

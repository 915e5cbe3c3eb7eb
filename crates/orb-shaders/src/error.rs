//! Shader compilation errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShaderError {
    /// The shaderc compiler or its options could not be created.
    #[error("Failed to initialise shader compiler: {0}")]
    Init(String),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The shader stage could not be derived from the file name.
    #[error("Cannot determine shader stage of {0:?}")]
    UnknownKind(PathBuf),

    #[error("Failed to compile {name}: {message}")]
    Compilation { name: String, message: String },

    /// Bytes do not form a SPIR-V module.
    #[error("Invalid SPIR-V: {0}")]
    InvalidSpirv(String),
}

pub type Result<T> = std::result::Result<T, ShaderError>;

mod parser;
mod properties;
mod writer;

pub use parser::*;
pub use properties::*;
pub use writer::*;

/// Error types for the PLY module.
#[derive(Debug, thiserror::Error)]
pub enum PlyError {
    /// Failed to read or write the PLY file
    #[error("Failed to access PLY file")]
    Io(#[from] std::io::Error),

    /// Failed to deserialize a PLY vertex
    #[error("Failed to deserialize PLY vertex")]
    Deserialize(#[from] bincode::error::DecodeError),

    /// The header is not a binary little endian PLY header
    #[error("Invalid PLY header: {0}")]
    InvalidHeader(String),

    /// Unsupported PLY property
    #[error("Unsupported PLY property: {0}")]
    UnsupportedProperty(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors produced by stores, codecs and the storage context.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("corrupted store {path}: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("checksum mismatch at offset {offset}: expected {expected}, found {found}")]
    ChecksumMismatch {
        offset: u64,
        expected: String,
        found: String,
    },

    #[error("operation `{operation}` is not supported by this store")]
    Unsupported { operation: &'static str },

    #[error("incompatible store format: expected version {expected}, found {found}")]
    IncompatibleFormat { expected: u32, found: u32 },

    #[error("invalid store name `{0}`")]
    InvalidName(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        StorageError::Decode(message.into())
    }

    pub(crate) fn unsupported(operation: &'static str) -> Self {
        StorageError::Unsupported { operation }
    }

    /// Decode and checksum failures mean the persisted state cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::Decode(_)
                | StorageError::Corrupted { .. }
                | StorageError::ChecksumMismatch { .. }
                | StorageError::Bincode(_)
        )
    }
}

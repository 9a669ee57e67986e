use bsync_bsp::BspError;
use bsync_config::ProjectViewError;
use bsync_storage::StorageError;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a {running} sync is already in progress")]
    AlreadyInProgress { running: String },

    #[error("a partial sync needs at least one target")]
    EmptyPartialScope,

    #[error("sync cancelled")]
    Cancelled,

    #[error("diff application stopped at `{diff}`")]
    ApplyAborted { diff: String },

    #[error("build server: {0}")]
    Server(#[from] BspError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    ProjectView(#[from] ProjectViewError),

    #[error("hook `{id}` is registered twice")]
    DuplicateHook { id: String },
}

impl SyncError {
    /// Cancellation reported by any layer, including the build server.
    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::Server(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

use thiserror::Error;
use ultramalloc_core::AllocError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("allocator: {0}")]
    Alloc(#[from] AllocError),
    #[error("churn needs at least one thread")]
    NoThreads,
    #[error("churn worker panicked")]
    WorkerPanicked,
}

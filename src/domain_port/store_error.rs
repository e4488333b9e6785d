#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stored value is corrupted: {0}")]
    Corrupted(String),
    #[error("store error: {0}")]
    Backend(String),
}

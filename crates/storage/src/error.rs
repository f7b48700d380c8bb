use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("stored body is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot prepare data folder: {0}")]
    Io(#[from] std::io::Error),
}

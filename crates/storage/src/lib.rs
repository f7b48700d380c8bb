pub mod db;
pub mod error;
pub mod repositories;
pub mod store;

pub use db::Database;
pub use error::StoreError;
pub use store::{CycleStore, MemoryStore, SqliteStore};

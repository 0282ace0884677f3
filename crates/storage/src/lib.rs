#![forbid(unsafe_code)]

pub mod grading;
pub mod http;
pub mod repository;
pub mod sqlite;

pub use repository::{AttemptStore, QuizCatalog, Storage, StorageError};

//! Session data storage
//!
//! Raw session acquisition (with an on-disk cache) and the SQLite
//! repository holding the append-only set of ingested results.

pub mod cache;
pub mod repository;
pub mod schema;
pub mod source;

pub use cache::SessionCache;
pub use repository::RaceRepository;
pub use source::{CachedSource, CsvDirectorySource, SessionSource};

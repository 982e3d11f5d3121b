//! MongoDB document engine for `EventVault`
//!
//! Implements the `DocumentEngine` port on top of the official `mongodb`
//! driver. Engine-neutral filters and updates are rendered to BSON query
//! documents, documents are converted between `serde_json` and `bson`, and
//! server error codes are mapped onto `EngineError`.
//!
//! Transactions use snapshot reads and majority writes and therefore need a
//! replica set. Change feeds are database-level change streams filtered to
//! inserts into the watched collections.
//!
//! ```ignore
//! use eventvault_mongodb::{MongoConfig, MongoDocumentEngine};
//!
//! let engine = MongoDocumentEngine::connect(MongoConfig::from_env()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod convert;
mod engine;
mod error;

pub use config::{MongoConfig, DATABASE_ENV, URI_ENV};
pub use engine::MongoDocumentEngine;
pub use error::{classify, error_code, map_mongo_error, MongoEngineError};

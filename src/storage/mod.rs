//! Storage module for ledger persistence

pub mod db;
pub mod persistence;

pub use db::{ChainDb, TIP_KEY};
pub use persistence::{BlockStore, StorageConfig, StorageError};

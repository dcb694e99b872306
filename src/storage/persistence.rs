//! Block file persistence
//!
//! Each block body lives in its own file, `<data_dir>/blocks/<height>.dat`,
//! holding the bincode-encoded block. Files are written to a temporary path
//! and renamed into place so a reader never sees a partial body.

use crate::core::Block;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Database error: {0}")]
    DbError(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Block at height {0} not found")]
    MissingBlock(u64),
    #[error("No ledger found in {0}")]
    NotInitialised(PathBuf),
    #[error("Ledger already exists in {0}")]
    AlreadyExists(PathBuf),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub blocks_dir: String,
    pub db_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".ledger_data"),
            blocks_dir: "blocks".to_string(),
            db_dir: "chaindb".to_string(),
        }
    }
}

impl StorageConfig {
    /// Configuration rooted at `data_dir` with default sub-directories
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join(&self.blocks_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_dir)
    }
}

/// Height-addressed block file store
#[derive(Debug, Clone)]
pub struct BlockStore {
    dir: PathBuf,
}

impl BlockStore {
    /// Open the store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Get the block file path
    fn block_path(&self, height: u64) -> PathBuf {
        self.dir.join(format!("{}.dat", height))
    }

    /// Persist a block body, replacing any file left at the same height
    pub fn write(&self, block: &Block) -> Result<(), StorageError> {
        let bytes = bincode::serialize(block)?;
        let path = self.block_path(block.height);

        // Write to temporary file first
        let temp_path = self.dir.join(format!("{}.tmp", block.height));
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    /// Load the block stored at `height`
    pub fn read(&self, height: u64) -> Result<Block, StorageError> {
        let bytes = match fs::read(self.block_path(height)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::MissingBlock(height))
            }
            Err(e) => return Err(e.into()),
        };
        let block: Block = bincode::deserialize(&bytes)?;

        if block.height != height {
            return Err(StorageError::InvalidData(format!(
                "block file {} holds height {}",
                height, block.height
            )));
        }

        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn test_write_read_block() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocks_dir = temp_dir.path().join("blocks");
        let store = BlockStore::open(blocks_dir.clone()).unwrap();
        let genesis = Block::genesis(&KeyPair::generate().lock_hash()).unwrap();

        store.write(&genesis).unwrap();
        assert!(blocks_dir.join("0.dat").exists());
        assert!(!blocks_dir.join("0.tmp").exists());

        let loaded = store.read(0).unwrap();
        assert_eq!(loaded, genesis);
    }

    #[test]
    fn test_missing_block() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();
        assert!(matches!(store.read(3), Err(StorageError::MissingBlock(3))));
    }

    #[test]
    fn test_rewrite_replaces_body() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();
        let first = Block::genesis(&KeyPair::generate().lock_hash()).unwrap();
        let second = Block::genesis(&KeyPair::generate().lock_hash()).unwrap();

        store.write(&first).unwrap();
        store.write(&second).unwrap();
        assert_eq!(store.read(0).unwrap().hash, second.hash);
    }

    #[test]
    fn test_storage_config_paths() {
        let config = StorageConfig::at("/tmp/ledger");
        assert_eq!(config.blocks_path(), PathBuf::from("/tmp/ledger/blocks"));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/ledger/chaindb"));
    }
}

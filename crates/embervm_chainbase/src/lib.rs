use std::path::Path;

use fjall::{Config, TransactionalKeyspace};
use embervm_serialization::{NumBytes, Read, ReadError, Write};

mod error;
pub use error::ChainbaseError;

mod delta;
pub use delta::{RowDelta, TableDelta};

mod undo_session;
pub use undo_session::{Session, UndoSession};

mod index;
pub use index::{Index, IndexIterator, TableIterator};

/// A row type stored in its own keyspace partition, addressable by a unique
/// primary key and optionally by one or more secondary orderings.
///
/// Primary keys encode big-endian so byte order equals numeric order.
pub trait ChainbaseObject: Default + Read + Write + NumBytes {
    type PrimaryKey;

    fn primary_key(&self) -> Vec<u8>;
    fn primary_key_to_bytes(key: Self::PrimaryKey) -> Vec<u8>;
    fn primary_key_from_bytes(bytes: &[u8]) -> Result<Self::PrimaryKey, ReadError>;
    fn secondary_indexes(&self) -> Vec<SecondaryKey>;
    fn table_name() -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryKey {
    pub key: Vec<u8>,
    pub index_name: &'static str,
}

/// An ordered secondary index over `C`, kept as its own partition mapping
/// secondary-key bytes to primary-key bytes.
pub trait SecondaryIndex<C>
where
    C: ChainbaseObject,
{
    type Key;

    fn secondary_key(object: &C) -> Vec<u8>;
    fn secondary_key_as_bytes(key: Self::Key) -> Vec<u8>;
    fn index_name() -> &'static str;
}

#[derive(Clone)]
pub struct Database {
    keyspace: TransactionalKeyspace,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self, ChainbaseError> {
        let keyspace = Config::new(path)
            .open_transactional()
            .map_err(|e| ChainbaseError::InternalError(format!("failed to open keyspace: {}", e)))?;
        Ok(Self { keyspace })
    }

    pub fn temporary(path: &Path) -> Result<Self, ChainbaseError> {
        let keyspace = Config::new(path)
            .temporary(true)
            .open_transactional()
            .map_err(|e| ChainbaseError::InternalError(format!("failed to open keyspace: {}", e)))?;
        Ok(Self { keyspace })
    }

    /// Open the partitions backing `T` up front so that every node creates
    /// them in the same order.
    pub fn prepare<T: ChainbaseObject>(&self) -> Result<(), ChainbaseError> {
        self.open_partition_handle(T::table_name())?;
        for index in T::default().secondary_indexes() {
            self.open_partition_handle(index.index_name)?;
        }
        Ok(())
    }

    pub fn open_partition_handle(&self, name: &str) -> Result<(), ChainbaseError> {
        self.keyspace
            .open_partition(name, Default::default())
            .map_err(|e| {
                ChainbaseError::InternalError(format!("failed to open partition {}: {}", name, e))
            })?;
        Ok(())
    }

    pub fn exists<T: ChainbaseObject>(&self, key: T::PrimaryKey) -> Result<bool, ChainbaseError> {
        let partition = self
            .keyspace
            .open_partition(T::table_name(), Default::default())
            .map_err(|e| ChainbaseError::InternalError(format!("failed to open partition: {}", e)))?;
        let tx = self.keyspace.read_tx();
        let res = tx
            .contains_key(&partition, T::primary_key_to_bytes(key))
            .map_err(|e| ChainbaseError::InternalError(format!("failed to check existence: {}", e)))?;
        Ok(res)
    }

    pub fn find<T: ChainbaseObject>(&self, key: T::PrimaryKey) -> Result<Option<T>, ChainbaseError> {
        let partition = self
            .keyspace
            .open_partition(T::table_name(), Default::default())
            .map_err(|e| ChainbaseError::InternalError(format!("failed to open partition: {}", e)))?;
        let tx = self.keyspace.read_tx();
        let serialized = tx
            .get(&partition, T::primary_key_to_bytes(key))
            .map_err(|e| ChainbaseError::InternalError(format!("failed to get object: {}", e)))?;
        match serialized {
            Some(serialized) => {
                let mut pos = 0;
                let object = T::read(&serialized, &mut pos)?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    pub fn get<T: ChainbaseObject>(&self, key: T::PrimaryKey) -> Result<T, ChainbaseError> {
        self.find::<T>(key)?.ok_or(ChainbaseError::NotFound)
    }

    pub fn find_by_secondary<T: ChainbaseObject, S: SecondaryIndex<T>>(
        &self,
        key: S::Key,
    ) -> Result<Option<T>, ChainbaseError> {
        let partition = self
            .keyspace
            .open_partition(S::index_name(), Default::default())
            .map_err(|e| ChainbaseError::InternalError(format!("failed to open partition: {}", e)))?;
        let tx = self.keyspace.read_tx();
        let primary_key = tx
            .get(&partition, S::secondary_key_as_bytes(key))
            .map_err(|e| ChainbaseError::InternalError(format!("failed to get secondary key: {}", e)))?;
        let Some(primary_key) = primary_key else {
            return Ok(None);
        };
        let partition = self
            .keyspace
            .open_partition(T::table_name(), Default::default())
            .map_err(|e| ChainbaseError::InternalError(format!("failed to open partition: {}", e)))?;
        let serialized = tx
            .get(&partition, primary_key)
            .map_err(|e| ChainbaseError::InternalError(format!("failed to get object: {}", e)))?;
        match serialized {
            Some(serialized) => {
                let mut pos = 0;
                let object = T::read(&serialized, &mut pos)?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    pub fn undo_session(&self) -> Result<UndoSession, ChainbaseError> {
        UndoSession::new(&self.keyspace)
    }
}

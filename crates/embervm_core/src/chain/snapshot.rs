use std::collections::VecDeque;

use embervm_chainbase::{ChainbaseObject, UndoSession};
use embervm_serialization::{Read, Write};
use sha2::{Digest, Sha256};

use crate::chain::{error::ChainError, utils::chain_assert};

/// Accumulates whole tables as packed rows in ascending primary-key order.
/// The packed snapshot and its digest are deterministic: two nodes with
/// identical state produce identical bytes.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    sections: Vec<(String, Vec<Vec<u8>>)>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section<T: ChainbaseObject>(
        &mut self,
        session: &UndoSession,
    ) -> Result<(), ChainError> {
        let mut rows = Vec::new();
        let mut itr = session.walk_table::<T>()?;
        while let Some(row) = itr.next()? {
            rows.push(row.pack()?);
        }
        self.sections.push((T::table_name().to_string(), rows));
        Ok(())
    }

    pub fn pack(&self) -> Result<Vec<u8>, ChainError> {
        Ok(self.sections.pack()?)
    }

    pub fn digest(&self) -> Result<[u8; 32], ChainError> {
        let packed = self.pack()?;
        Ok(Sha256::digest(&packed).into())
    }
}

/// Replays a packed snapshot section by section, in the order the writer
/// emitted them.
#[derive(Debug)]
pub struct SnapshotReader {
    sections: VecDeque<(String, Vec<Vec<u8>>)>,
}

impl SnapshotReader {
    pub fn new(bytes: &[u8]) -> Result<Self, ChainError> {
        let mut pos = 0;
        let sections = Vec::<(String, Vec<Vec<u8>>)>::read(bytes, &mut pos)?;
        chain_assert(
            pos == bytes.len(),
            ChainError::SerializationError("trailing bytes after snapshot".to_string()),
        )?;
        Ok(Self {
            sections: sections.into(),
        })
    }

    pub fn read_section<T: ChainbaseObject>(
        &mut self,
        session: &mut UndoSession,
    ) -> Result<(), ChainError> {
        let (name, rows) = self.sections.pop_front().ok_or_else(|| {
            ChainError::SerializationError(format!(
                "snapshot is missing section {}",
                T::table_name()
            ))
        })?;
        chain_assert(
            name == T::table_name(),
            ChainError::SerializationError(format!(
                "snapshot section {} found where {} was expected",
                name,
                T::table_name()
            )),
        )?;
        for row in rows {
            let mut pos = 0;
            let object = T::read(&row, &mut pos)?;
            session.insert(&object).map_err(|e| {
                ChainError::DatabaseError(format!(
                    "failed to restore row into {}: {}",
                    T::table_name(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashSet, VecDeque},
    rc::Rc,
};

use fjall::{Slice, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction};

use crate::{
    ChainbaseError, ChainbaseObject, RowDelta, SecondaryIndex, SecondaryKey, TableDelta,
    index::{Index, TableIterator},
};

const SEQUENCE_PARTITION: &str = "sequences";

pub(crate) enum RowChange {
    Created {
        table: &'static str,
        key: Vec<u8>,
        indexes: Vec<SecondaryKey>,
    },
    Updated {
        table: &'static str,
        key: Vec<u8>,
        old: Vec<u8>,
        old_indexes: Vec<SecondaryKey>,
        new_indexes: Vec<SecondaryKey>,
    },
    Removed {
        table: &'static str,
        key: Vec<u8>,
        old: Vec<u8>,
        old_indexes: Vec<SecondaryKey>,
    },
}

/// One entry of the undo stack: the deltas recorded while it was the top
/// frame, plus the keys it erased and has not re-created since.
#[derive(Default)]
struct UndoFrame {
    changes: VecDeque<RowChange>,
    removed: HashSet<(&'static str, Vec<u8>)>,
}

pub(crate) struct SessionState {
    tx: WriteTransaction,
    keyspace: TransactionalKeyspace,
    frames: Vec<UndoFrame>,
}

fn open_partition(
    keyspace: &TransactionalKeyspace,
    name: &str,
) -> Result<TransactionalPartitionHandle, ChainbaseError> {
    keyspace.open_partition(name, Default::default()).map_err(|e| {
        ChainbaseError::InternalError(format!("failed to open partition {}: {}", name, e))
    })
}

impl SessionState {
    /// Reverse and discard every frame above `depth`, newest first.
    fn revert_to_depth(&mut self, depth: usize) -> Result<(), ChainbaseError> {
        while self.frames.len() > depth {
            let frame = self
                .frames
                .pop()
                .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
            for change in frame.changes.iter().rev() {
                match change {
                    RowChange::Created { table, key, indexes } => {
                        let partition = open_partition(&self.keyspace, table)?;
                        self.tx.remove(&partition, key.as_slice());
                        for index in indexes {
                            let partition = open_partition(&self.keyspace, index.index_name)?;
                            self.tx.remove(&partition, index.key.as_slice());
                        }
                    }
                    RowChange::Updated {
                        table,
                        key,
                        old,
                        old_indexes,
                        new_indexes,
                    } => {
                        let partition = open_partition(&self.keyspace, table)?;
                        self.tx.insert(&partition, key.as_slice(), old.as_slice());
                        for index in new_indexes {
                            if !old_indexes.contains(index) {
                                let partition = open_partition(&self.keyspace, index.index_name)?;
                                self.tx.remove(&partition, index.key.as_slice());
                            }
                        }
                        for index in old_indexes {
                            if !new_indexes.contains(index) {
                                let partition = open_partition(&self.keyspace, index.index_name)?;
                                self.tx.insert(&partition, index.key.as_slice(), key.as_slice());
                            }
                        }
                    }
                    RowChange::Removed {
                        table,
                        key,
                        old,
                        old_indexes,
                    } => {
                        let partition = open_partition(&self.keyspace, table)?;
                        self.tx.insert(&partition, key.as_slice(), old.as_slice());
                        for index in old_indexes {
                            let partition = open_partition(&self.keyspace, index.index_name)?;
                            self.tx.insert(&partition, index.key.as_slice(), key.as_slice());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn squash_top_frame(&mut self) -> Result<(), ChainbaseError> {
        if self.frames.len() < 2 {
            return Err(ChainbaseError::InternalError(
                "cannot squash the root undo frame".to_string(),
            ));
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
        let parent = self
            .frames
            .last_mut()
            .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
        // A key re-created by the child is no longer erased from the merged
        // frame's point of view.
        for change in &frame.changes {
            if let RowChange::Created { table, key, .. } = change {
                parent.removed.remove(&(*table, key.clone()));
            }
        }
        parent.removed.extend(frame.removed);
        parent.changes.extend(frame.changes);
        Ok(())
    }
}

/// A write transaction over the database carrying a stack of undo frames.
///
/// Every mutation records enough state in the top frame to be reversed
/// exactly; nested [`Session`]s push and pop frames so a failed speculative
/// transaction can be discarded without disturbing the frames below it.
#[derive(Clone)]
pub struct UndoSession {
    state: Rc<RefCell<SessionState>>,
}

impl UndoSession {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<Self, ChainbaseError> {
        let tx = keyspace.write_tx().map_err(|e| {
            ChainbaseError::InternalError(format!("failed to begin write transaction: {}", e))
        })?;
        Ok(Self {
            state: Rc::new(RefCell::new(SessionState {
                tx,
                keyspace: keyspace.clone(),
                frames: vec![UndoFrame::default()],
            })),
        })
    }

    /// Push a new undo frame. Until the returned [`Session`] is resolved,
    /// every mutation is recorded in that frame; dropping it unresolved
    /// reverses them.
    pub fn start_undo_session(&mut self) -> Session {
        let depth = {
            let mut state = self.state.borrow_mut();
            state.frames.push(UndoFrame::default());
            state.frames.len() - 1
        };
        Session {
            state: self.state.clone(),
            depth,
            resolved: false,
        }
    }

    /// Number of frames currently on the undo stack, the root frame included.
    pub fn depth(&self) -> usize {
        self.state.borrow().frames.len()
    }

    pub fn exists<T: ChainbaseObject>(&mut self, key: T::PrimaryKey) -> Result<bool, ChainbaseError> {
        let state = &mut *self.state.borrow_mut();
        let partition = open_partition(&state.keyspace, T::table_name())?;
        let res = state
            .tx
            .contains_key(&partition, T::primary_key_to_bytes(key))
            .map_err(|e| ChainbaseError::InternalError(format!("failed to check existence: {}", e)))?;
        Ok(res)
    }

    pub fn find<T: ChainbaseObject>(
        &mut self,
        key: T::PrimaryKey,
    ) -> Result<Option<T>, ChainbaseError> {
        let state = &mut *self.state.borrow_mut();
        let partition = open_partition(&state.keyspace, T::table_name())?;
        let serialized = state
            .tx
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

    /// Like [`UndoSession::find`], but a missing key is an error. Reaching
    /// for a row that must exist and missing it indicates a consensus-logic
    /// bug upstream.
    pub fn get<T: ChainbaseObject>(&mut self, key: T::PrimaryKey) -> Result<T, ChainbaseError> {
        self.find::<T>(key)?.ok_or(ChainbaseError::NotFound)
    }

    pub fn find_by_secondary<T: ChainbaseObject, S: SecondaryIndex<T>>(
        &mut self,
        key: S::Key,
    ) -> Result<Option<T>, ChainbaseError> {
        let state = &mut *self.state.borrow_mut();
        let partition = open_partition(&state.keyspace, S::index_name())?;
        let primary_key = state
            .tx
            .get(&partition, S::secondary_key_as_bytes(key))
            .map_err(|e| ChainbaseError::InternalError(format!("failed to get secondary key: {}", e)))?;
        let Some(primary_key) = primary_key else {
            return Ok(None);
        };
        let partition = open_partition(&state.keyspace, T::table_name())?;
        let serialized = state
            .tx
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

    /// Next value of the per-table monotonic primary-key counter, kept in a
    /// dedicated sequence partition so table scans never see it.
    pub fn generate_id<T: ChainbaseObject>(&mut self) -> Result<u64, ChainbaseError> {
        let state = &mut *self.state.borrow_mut();
        let partition = open_partition(&state.keyspace, SEQUENCE_PARTITION)?;
        let mut new_id = 0u64;
        state
            .tx
            .fetch_update(&partition, T::table_name(), |v| {
                let next = match v {
                    Some(slice) => {
                        let mut arr = [0u8; 8];
                        arr.copy_from_slice(slice.as_ref());
                        u64::from_be_bytes(arr).wrapping_add(1)
                    }
                    None => 0,
                };
                new_id = next;
                Some(Slice::new(&next.to_be_bytes()))
            })
            .map_err(|e| {
                ChainbaseError::InternalError(format!("failed to update sequence: {}", e))
            })?;
        Ok(new_id)
    }

    pub fn insert<T: ChainbaseObject>(&mut self, object: &T) -> Result<(), ChainbaseError> {
        let key = object.primary_key();
        let serialized = object.pack()?;
        let indexes = object.secondary_indexes();

        let state = &mut *self.state.borrow_mut();
        let partition = open_partition(&state.keyspace, T::table_name())?;
        let exists = state
            .tx
            .contains_key(&partition, key.as_slice())
            .map_err(|e| ChainbaseError::InternalError(format!("failed to check existence: {}", e)))?;
        if exists {
            return Err(ChainbaseError::AlreadyExists);
        }
        state.tx.insert(&partition, key.as_slice(), serialized);
        for index in &indexes {
            let partition = open_partition(&state.keyspace, index.index_name)?;
            state.tx.insert(&partition, index.key.as_slice(), key.as_slice());
        }
        let frame = state
            .frames
            .last_mut()
            .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
        frame.removed.remove(&(T::table_name(), key.clone()));
        frame.changes.push_back(RowChange::Created {
            table: T::table_name(),
            key,
            indexes,
        });
        Ok(())
    }

    pub fn modify<T, F>(&mut self, old: &mut T, f: F) -> Result<(), ChainbaseError>
    where
        T: ChainbaseObject,
        F: FnOnce(&mut T),
    {
        let key = old.primary_key();

        let state = &mut *self.state.borrow_mut();
        let frame = state
            .frames
            .last()
            .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
        if frame.removed.contains(&(T::table_name(), key.clone())) {
            return Err(ChainbaseError::InvalidStateTransition(format!(
                "modify of a key erased in the same session in table {}",
                T::table_name()
            )));
        }
        let partition = open_partition(&state.keyspace, T::table_name())?;
        let existing = state
            .tx
            .get(&partition, key.as_slice())
            .map_err(|e| ChainbaseError::InternalError(format!("failed to get object: {}", e)))?;
        let Some(existing) = existing else {
            return Err(ChainbaseError::NotFound);
        };

        let old_indexes = old.secondary_indexes();
        f(old);
        if old.primary_key() != key {
            return Err(ChainbaseError::InvalidData);
        }
        let new_indexes = old.secondary_indexes();
        let serialized_new = old.pack()?;

        state.tx.insert(&partition, key.as_slice(), serialized_new);
        for index in &old_indexes {
            if !new_indexes.contains(index) {
                let partition = open_partition(&state.keyspace, index.index_name)?;
                state.tx.remove(&partition, index.key.as_slice());
            }
        }
        for index in &new_indexes {
            if !old_indexes.contains(index) {
                let partition = open_partition(&state.keyspace, index.index_name)?;
                state.tx.insert(&partition, index.key.as_slice(), key.as_slice());
            }
        }
        let frame = state
            .frames
            .last_mut()
            .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
        frame.changes.push_back(RowChange::Updated {
            table: T::table_name(),
            key,
            old: existing.to_vec(),
            old_indexes,
            new_indexes,
        });
        Ok(())
    }

    pub fn remove<T: ChainbaseObject>(&mut self, object: T) -> Result<(), ChainbaseError> {
        let key = object.primary_key();
        let old_indexes = object.secondary_indexes();

        let state = &mut *self.state.borrow_mut();
        let frame = state
            .frames
            .last()
            .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
        if frame.removed.contains(&(T::table_name(), key.clone())) {
            return Err(ChainbaseError::InvalidStateTransition(format!(
                "double erase of a key in table {}",
                T::table_name()
            )));
        }
        let partition = open_partition(&state.keyspace, T::table_name())?;
        let old_value = state
            .tx
            .get(&partition, key.as_slice())
            .map_err(|e| ChainbaseError::InternalError(format!("failed to get object: {}", e)))?;
        let Some(old_value) = old_value else {
            return Err(ChainbaseError::NotFound);
        };
        state.tx.remove(&partition, key.as_slice());
        for index in &old_indexes {
            let partition = open_partition(&state.keyspace, index.index_name)?;
            state.tx.remove(&partition, index.key.as_slice());
        }
        let frame = state
            .frames
            .last_mut()
            .ok_or_else(|| ChainbaseError::InternalError("undo stack is empty".to_string()))?;
        frame.removed.insert((T::table_name(), key.clone()));
        frame.changes.push_back(RowChange::Removed {
            table: T::table_name(),
            key,
            old: old_value.to_vec(),
            old_indexes,
        });
        Ok(())
    }

    pub fn get_index<C, S>(&self) -> Index<C, S>
    where
        C: ChainbaseObject,
        S: SecondaryIndex<C>,
    {
        Index::<C, S>::new(self.clone())
    }

    /// Ascending primary-key scan over every row of `T`, as currently
    /// visible to this session.
    pub fn walk_table<T: ChainbaseObject>(&self) -> Result<TableIterator<T>, ChainbaseError> {
        TableIterator::<T>::new(self.clone())
    }

    /// Summarize every row touched since the session began, one entry per
    /// table sorted by name, rows sorted by primary key. Used by the
    /// state-history consumer at block close.
    pub fn collect_deltas(&self) -> Result<Vec<TableDelta>, ChainbaseError> {
        let state = &mut *self.state.borrow_mut();
        let mut staged: BTreeMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>> = BTreeMap::new();
        for frame in &state.frames {
            for change in &frame.changes {
                match change {
                    RowChange::Created { table, key, .. }
                    | RowChange::Updated { table, key, .. } => {
                        staged.entry(*table).or_default().insert(key.clone(), Vec::new());
                    }
                    RowChange::Removed { table, key, old, .. } => {
                        staged
                            .entry(*table)
                            .or_default()
                            .insert(key.clone(), old.clone());
                    }
                }
            }
        }
        let mut deltas = Vec::new();
        for (table, rows) in staged {
            let partition = open_partition(&state.keyspace, table)?;
            let mut out = Vec::with_capacity(rows.len());
            for (key, pre_image) in rows {
                let current = state
                    .tx
                    .get(&partition, key.as_slice())
                    .map_err(|e| ChainbaseError::InternalError(format!("failed to get object: {}", e)))?;
                match current {
                    Some(value) => out.push(RowDelta {
                        present: true,
                        key,
                        value: value.to_vec(),
                    }),
                    None => out.push(RowDelta {
                        present: false,
                        key,
                        value: pre_image,
                    }),
                }
            }
            deltas.push(TableDelta {
                table: table.to_string(),
                rows: out,
            });
        }
        Ok(deltas)
    }

    pub(crate) fn with_tx<R>(
        &self,
        f: impl FnOnce(&mut WriteTransaction, &TransactionalKeyspace) -> R,
    ) -> R {
        let state = &mut *self.state.borrow_mut();
        f(&mut state.tx, &state.keyspace)
    }

    /// Make every change since the session began durable. Fails while nested
    /// sessions or iterators are still alive.
    pub fn commit(self) -> Result<(), ChainbaseError> {
        let state = Rc::try_unwrap(self.state)
            .map_err(|_| {
                ChainbaseError::InternalError(
                    "cannot commit while nested sessions are active".to_string(),
                )
            })?
            .into_inner();
        let _ = state
            .tx
            .commit()
            .map_err(|e| ChainbaseError::InternalError(format!("failed to commit transaction: {}", e)))?;
        Ok(())
    }

    /// Discard every change since the session began.
    pub fn rollback(self) -> Result<(), ChainbaseError> {
        let state = Rc::try_unwrap(self.state)
            .map_err(|_| {
                ChainbaseError::InternalError(
                    "cannot roll back while nested sessions are active".to_string(),
                )
            })?
            .into_inner();
        state.tx.rollback();
        Ok(())
    }
}

/// A nested undo frame with scope-bound rollback: dropping the session
/// without calling [`Session::push`], [`Session::squash`] or
/// [`Session::undo`] reverses its frame on the way out.
pub struct Session {
    state: Rc<RefCell<SessionState>>,
    depth: usize,
    resolved: bool,
}

impl Session {
    /// Reverse every delta recorded in this frame (and in frames pushed
    /// above it), newest first, and pop it from the stack.
    pub fn undo(mut self) -> Result<(), ChainbaseError> {
        self.resolved = true;
        self.state.borrow_mut().revert_to_depth(self.depth)
    }

    /// Merge this frame's deltas into the parent frame, so they are undone
    /// or kept together with it.
    pub fn squash(mut self) -> Result<(), ChainbaseError> {
        let mut state = self.state.borrow_mut();
        if self.depth != state.frames.len() - 1 {
            return Err(ChainbaseError::InternalError(
                "undo sessions must be unwound in stack order".to_string(),
            ));
        }
        self.resolved = true;
        state.squash_top_frame()
    }

    /// Keep the frame's changes staged; the enclosing [`UndoSession`] now
    /// owns the commit-or-rollback decision.
    pub fn push(mut self) {
        self.resolved = true;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.resolved {
            let _ = self.state.borrow_mut().revert_to_depth(self.depth);
        }
    }
}

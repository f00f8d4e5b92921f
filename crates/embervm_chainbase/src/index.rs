use std::{marker::PhantomData, ops::Bound};

use fjall::Slice;

use crate::{ChainbaseError, ChainbaseObject, SecondaryIndex, UndoSession};

/// Ordered access to a secondary index as seen by an undo session,
/// uncommitted changes included.
pub struct Index<C, S>
where
    C: ChainbaseObject,
    S: SecondaryIndex<C>,
{
    session: UndoSession,
    _phantom: PhantomData<(C, S)>,
}

impl<C, S> Index<C, S>
where
    C: ChainbaseObject,
    S: SecondaryIndex<C>,
{
    #[inline]
    pub(crate) fn new(session: UndoSession) -> Self {
        Index::<C, S> {
            session,
            _phantom: PhantomData,
        }
    }

    /// Iterate ascending from `key` (inclusive) to the end of the index.
    #[inline]
    pub fn lower_bound(&self, key: S::Key) -> IndexIterator<C, S> {
        let key_bytes = S::secondary_key_as_bytes(key);
        IndexIterator::<C, S> {
            session: self.session.clone(),
            range: (Bound::Included(Slice::from(key_bytes)), Bound::Unbounded),
            _phantom: PhantomData,
        }
    }

    /// Iterate ascending over `[lower, upper)`.
    #[inline]
    pub fn range(&self, lower: S::Key, upper: S::Key) -> IndexIterator<C, S> {
        let lower_bytes = S::secondary_key_as_bytes(lower);
        let upper_bytes = S::secondary_key_as_bytes(upper);
        IndexIterator::<C, S> {
            session: self.session.clone(),
            range: (
                Bound::Included(Slice::from(lower_bytes)),
                Bound::Excluded(Slice::from(upper_bytes)),
            ),
            _phantom: PhantomData,
        }
    }
}

/// Stepping iterator over a secondary index. The underlying range query is
/// re-issued from the last seen key on every step, so rows may be inserted
/// or removed between steps without invalidating the iterator.
pub struct IndexIterator<C, S>
where
    C: ChainbaseObject,
    S: SecondaryIndex<C>,
{
    session: UndoSession,
    range: (Bound<Slice>, Bound<Slice>),
    _phantom: PhantomData<(C, S)>,
}

impl<C, S> IndexIterator<C, S>
where
    C: ChainbaseObject,
    S: SecondaryIndex<C>,
{
    pub fn next(&mut self) -> Result<Option<C>, ChainbaseError> {
        let step = self
            .session
            .with_tx(|tx, keyspace| -> Result<Option<(Slice, Slice)>, ChainbaseError> {
                let partition = keyspace
                    .open_partition(S::index_name(), Default::default())
                    .map_err(|e| {
                        ChainbaseError::InternalError(format!("failed to open partition: {}", e))
                    })?;
                let mut range = tx.range(&partition, self.range.clone());
                match range.next() {
                    Some(kv) => {
                        let (key, value) = kv.map_err(|e| {
                            ChainbaseError::InternalError(format!("failed to step index: {}", e))
                        })?;
                        Ok(Some((key, value)))
                    }
                    None => Ok(None),
                }
            })?;

        let Some((key, value)) = step else {
            return Ok(None);
        };
        self.range = (Bound::Excluded(key), self.range.1.clone());
        let primary_key = C::primary_key_from_bytes(value.as_ref())?;
        let object = self.session.clone().get::<C>(primary_key)?;
        Ok(Some(object))
    }

    pub fn previous(&mut self) -> Result<Option<C>, ChainbaseError> {
        let step = self
            .session
            .with_tx(|tx, keyspace| -> Result<Option<(Slice, Slice)>, ChainbaseError> {
                let partition = keyspace
                    .open_partition(S::index_name(), Default::default())
                    .map_err(|e| {
                        ChainbaseError::InternalError(format!("failed to open partition: {}", e))
                    })?;
                let mut range = tx.range(&partition, self.range.clone()).rev();
                match range.next() {
                    Some(kv) => {
                        let (key, value) = kv.map_err(|e| {
                            ChainbaseError::InternalError(format!("failed to step index: {}", e))
                        })?;
                        Ok(Some((key, value)))
                    }
                    None => Ok(None),
                }
            })?;

        let Some((key, value)) = step else {
            return Ok(None);
        };
        self.range = (self.range.0.clone(), Bound::Excluded(key));
        let primary_key = C::primary_key_from_bytes(value.as_ref())?;
        let object = self.session.clone().get::<C>(primary_key)?;
        Ok(Some(object))
    }
}

/// Ascending primary-key scan over a whole table, re-issued from the last
/// seen key on every step like [`IndexIterator`].
pub struct TableIterator<T>
where
    T: ChainbaseObject,
{
    session: UndoSession,
    range: (Bound<Slice>, Bound<Slice>),
    _phantom: PhantomData<T>,
}

impl<T> TableIterator<T>
where
    T: ChainbaseObject,
{
    pub(crate) fn new(session: UndoSession) -> Result<Self, ChainbaseError> {
        Ok(TableIterator::<T> {
            session,
            range: (Bound::Unbounded, Bound::Unbounded),
            _phantom: PhantomData,
        })
    }

    pub fn next(&mut self) -> Result<Option<T>, ChainbaseError> {
        let step = self
            .session
            .with_tx(|tx, keyspace| -> Result<Option<(Slice, Slice)>, ChainbaseError> {
                let partition = keyspace
                    .open_partition(T::table_name(), Default::default())
                    .map_err(|e| {
                        ChainbaseError::InternalError(format!("failed to open partition: {}", e))
                    })?;
                let mut range = tx.range(&partition, self.range.clone());
                match range.next() {
                    Some(kv) => {
                        let (key, value) = kv.map_err(|e| {
                            ChainbaseError::InternalError(format!(
                                "failed to step table scan: {}",
                                e
                            ))
                        })?;
                        Ok(Some((key, value)))
                    }
                    None => Ok(None),
                }
            })?;

        let Some((key, value)) = step else {
            return Ok(None);
        };
        self.range = (Bound::Excluded(key), self.range.1.clone());
        let mut pos = 0;
        let object = T::read(value.as_ref(), &mut pos)?;
        Ok(Some(object))
    }
}

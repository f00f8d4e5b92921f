use embervm_proc_macros::{NumBytes, Read, Write};

/// One row's disposition at the end of a block: `present` rows carry their
/// current serialized value, deleted rows carry their last pre-image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Read, Write, NumBytes)]
pub struct RowDelta {
    pub present: bool,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// All rows of one table touched since the undo session began, sorted by
/// primary key. Tables are emitted sorted by name so the packed form is
/// deterministic across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Read, Write, NumBytes)]
pub struct TableDelta {
    pub table: String,
    pub rows: Vec<RowDelta>,
}

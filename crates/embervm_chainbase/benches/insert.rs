use criterion::{Criterion, criterion_group, criterion_main};
use embervm_chainbase::{ChainbaseObject, Database, SecondaryKey, UndoSession};
use embervm_proc_macros::{NumBytes, Read, Write};
use embervm_serialization::ReadError;
use tempfile::tempdir;

#[derive(Debug, Default, Clone, Read, Write, NumBytes)]
struct TestObject {
    id: u64,
    name: String,
}

impl ChainbaseObject for TestObject {
    type PrimaryKey = u64;

    fn primary_key(&self) -> Vec<u8> {
        TestObject::primary_key_to_bytes(self.id)
    }
    fn primary_key_to_bytes(key: Self::PrimaryKey) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }
    fn primary_key_from_bytes(bytes: &[u8]) -> Result<Self::PrimaryKey, ReadError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| ReadError::NotEnoughBytes)?;
        Ok(u64::from_be_bytes(arr))
    }
    fn secondary_indexes(&self) -> Vec<SecondaryKey> {
        vec![]
    }
    fn table_name() -> &'static str {
        "test_object"
    }
}

fn bench(session: &mut UndoSession, id: u64) {
    session
        .insert(&TestObject {
            id,
            name: "test".to_string(),
        })
        .unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let path = tempdir().unwrap();
    let db = Database::temporary(path.path()).unwrap();
    let mut session = db.undo_session().unwrap();
    let mut id = 0u64;
    c.bench_function("insert", |b| {
        b.iter(|| {
            bench(&mut session, id);
            id += 1;
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

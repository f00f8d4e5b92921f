use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

pub const STATE_HISTORY_LOG_MAGIC: u64 = 0x656D_6265_7276_6D01;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateHistoryError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt entry at offset {0}")]
    Corrupt(u64),
    #[error("missed a block in {0}")]
    MissedBlock(String),
    #[error("block {0} not found")]
    NotFound(u32),
    #[error("bad magic at offset {at}: found {found:#x}, expected {expect:#x}")]
    BadMagic { at: u64, found: u64, expect: u64 },
}

/// On-disk entry header preceding each payload.
#[derive(Clone, Copy, Debug)]
struct EntryHeader {
    magic: u64,
    block_num: u32,
    payload_size: u64,
}

impl EntryHeader {
    const SIZE: usize = 8 + 4 + 8;

    fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(&self.magic.to_le_bytes())?;
        w.write_all(&self.block_num.to_le_bytes())?;
        w.write_all(&self.payload_size.to_le_bytes())?;
        Ok(())
    }

    fn read_at(file: &mut File, pos: u64) -> io::Result<Self> {
        file.seek(SeekFrom::Start(pos))?;
        let mut buf = [0u8; Self::SIZE];
        file.read_exact(&mut buf)?;
        let magic = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let block_num = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let payload_size = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        Ok(Self {
            magic,
            block_num,
            payload_size,
        })
    }
}

/// Append-only log of per-block table deltas, with a sidecar index file
/// mapping block number to file offset. Torn tail writes are truncated on
/// open; appended blocks must be contiguous.
#[derive(Debug)]
pub struct StateHistoryLog {
    name: String,
    log_path: PathBuf,
    log: BufWriter<File>,
    idx: BufWriter<File>,
    map: BTreeMap<u32, u64>,
    first_block: u32,
    last_block: u32,
    magic: u64,
}

impl StateHistoryLog {
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self, StateHistoryError> {
        Self::open_with_magic(dir, name, STATE_HISTORY_LOG_MAGIC)
    }

    pub fn open_with_magic<P: AsRef<Path>>(
        dir: P,
        name: &str,
        magic: u64,
    ) -> Result<Self, StateHistoryError> {
        let log_path = dir.as_ref().join(format!("{name}.log"));
        let idx_path = dir.as_ref().join(format!("{name}.index"));

        let mut log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)?;
        let mut idx_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&idx_path)?;

        // load the sidecar index
        let mut map = BTreeMap::new();
        let mut reader = BufReader::new(&idx_file);
        loop {
            let mut buf = [0u8; 12]; // u32 block + u64 offset
            match reader.read_exact(&mut buf) {
                Ok(()) => {
                    let block = u32::from_le_bytes(buf[0..4].try_into().unwrap());
                    let pos = u64::from_le_bytes(buf[4..12].try_into().unwrap());
                    map.insert(block, pos);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(StateHistoryError::Io(e)),
            }
        }

        let (first_block, last_block) = if map.is_empty() {
            let (first, last, scanned) = scan_log(&mut log_file, magic)?;
            map = scanned;
            (first, last)
        } else {
            let first = *map.keys().next().unwrap_or(&0);
            let last = *map.keys().last().unwrap_or(&0);
            // validate the tail entry and truncate a torn write
            if let Some(&tail_offset) = map.get(&last) {
                let valid_end = match validate_entry_at(&mut log_file, tail_offset, magic) {
                    Ok(end) => end,
                    Err(_) => {
                        map.remove(&last);
                        tail_offset
                    }
                };
                let len = log_file.metadata()?.len();
                if valid_end < len {
                    log_file.set_len(valid_end)?;
                }
            }
            (first, last)
        };

        log_file.seek(SeekFrom::End(0))?;
        idx_file.seek(SeekFrom::End(0))?;

        Ok(Self {
            name: name.to_string(),
            log_path,
            log: BufWriter::new(log_file),
            idx: BufWriter::new(idx_file),
            map,
            first_block,
            last_block,
            magic,
        })
    }

    /// Append the packed deltas of one block. Blocks must arrive in order
    /// with no gaps.
    pub fn append(&mut self, block_num: u32, payload: &[u8]) -> Result<(), StateHistoryError> {
        if self.last_block != 0 && block_num != self.last_block + 1 {
            return Err(StateHistoryError::MissedBlock(format!(
                "{}.log",
                self.name
            )));
        }

        let pos = self.log.get_ref().metadata()?.len();
        let header = EntryHeader {
            magic: self.magic,
            block_num,
            payload_size: payload.len() as u64,
        };
        header.write_to(&mut self.log)?;
        self.log.write_all(payload)?;
        self.log.flush()?;

        self.idx.write_all(&block_num.to_le_bytes())?;
        self.idx.write_all(&pos.to_le_bytes())?;
        self.idx.flush()?;

        self.map.insert(block_num, pos);
        if self.first_block == 0 {
            self.first_block = block_num;
        }
        self.last_block = block_num;
        Ok(())
    }

    /// Read back the payload appended for `block_num`.
    pub fn read_block(&self, block_num: u32) -> Result<Vec<u8>, StateHistoryError> {
        let pos = *self
            .map
            .get(&block_num)
            .ok_or(StateHistoryError::NotFound(block_num))?;
        let mut file = OpenOptions::new().read(true).open(&self.log_path)?;
        let header = EntryHeader::read_at(&mut file, pos)?;
        if header.magic != self.magic {
            return Err(StateHistoryError::BadMagic {
                at: pos,
                found: header.magic,
                expect: self.magic,
            });
        }
        if header.block_num != block_num {
            return Err(StateHistoryError::Corrupt(pos));
        }
        let mut buf = vec![0u8; header.payload_size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Stream an inclusive block range; the callback gets each block's
    /// number and payload in order.
    pub fn read_range<F>(&self, start: u32, end: u32, mut cb: F) -> Result<(), StateHistoryError>
    where
        F: FnMut(u32, &[u8]) -> Result<(), StateHistoryError>,
    {
        let mut file = OpenOptions::new().read(true).open(&self.log_path)?;
        for (&block, &pos) in self.map.range(start..=end) {
            let header = EntryHeader::read_at(&mut file, pos)?;
            if header.magic != self.magic {
                return Err(StateHistoryError::BadMagic {
                    at: pos,
                    found: header.magic,
                    expect: self.magic,
                });
            }
            if header.block_num != block {
                return Err(StateHistoryError::Corrupt(pos));
            }
            let mut buf = vec![0u8; header.payload_size as usize];
            file.read_exact(&mut buf)?;
            cb(block, &buf)?;
        }
        Ok(())
    }

    /// The stored `(first, last)` block numbers, or `None` while empty.
    pub fn range(&self) -> Option<(u32, u32)> {
        if self.last_block == 0 {
            None
        } else {
            Some((self.first_block, self.last_block))
        }
    }
}

/// Validate one header+payload at `pos`; return the end offset if intact.
fn validate_entry_at(
    file: &mut File,
    pos: u64,
    expect_magic: u64,
) -> Result<u64, StateHistoryError> {
    let len_total = file.metadata()?.len();
    if pos + (EntryHeader::SIZE as u64) > len_total {
        return Err(StateHistoryError::Corrupt(pos));
    }
    let header = EntryHeader::read_at(file, pos)?;
    if header.magic != expect_magic {
        return Err(StateHistoryError::BadMagic {
            at: pos,
            found: header.magic,
            expect: expect_magic,
        });
    }
    let end = pos + (EntryHeader::SIZE as u64) + header.payload_size;
    if end > len_total {
        return Err(StateHistoryError::Corrupt(pos));
    }
    Ok(end)
}

/// Rebuild the block map from the log itself, truncating a torn tail.
fn scan_log(
    file: &mut File,
    expect_magic: u64,
) -> Result<(u32, u32, BTreeMap<u32, u64>), StateHistoryError> {
    let mut pos = 0u64;
    let len_total = file.metadata()?.len();
    let mut map = BTreeMap::new();
    let mut first = 0u32;
    let mut last = 0u32;

    while pos < len_total {
        if pos + (EntryHeader::SIZE as u64) > len_total {
            file.set_len(pos)?;
            break;
        }
        let header = match EntryHeader::read_at(file, pos) {
            Ok(header) => header,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                file.set_len(pos)?;
                break;
            }
            Err(e) => return Err(StateHistoryError::Io(e)),
        };

        if header.magic != expect_magic {
            return Err(StateHistoryError::BadMagic {
                at: pos,
                found: header.magic,
                expect: expect_magic,
            });
        }

        let end = pos + (EntryHeader::SIZE as u64) + header.payload_size;
        if end > len_total {
            file.set_len(pos)?;
            break;
        }

        if first == 0 {
            first = header.block_num;
        }
        last = header.block_num;
        map.insert(header.block_num, pos);
        pos = end;
    }
    Ok((first, last, map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = StateHistoryLog::open(dir.path(), "resource").unwrap();
        assert_eq!(log.range(), None);

        log.append(1, b"one").unwrap();
        log.append(2, b"two").unwrap();
        log.append(3, b"three").unwrap();

        assert_eq!(log.range(), Some((1, 3)));
        assert_eq!(log.read_block(2).unwrap(), b"two");
        assert!(matches!(
            log.read_block(9),
            Err(StateHistoryError::NotFound(9))
        ));
    }

    #[test]
    fn rejects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = StateHistoryLog::open(dir.path(), "resource").unwrap();
        log.append(1, b"one").unwrap();
        assert!(matches!(
            log.append(3, b"three"),
            Err(StateHistoryError::MissedBlock(_))
        ));
    }

    #[test]
    fn reopen_recovers_the_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = StateHistoryLog::open(dir.path(), "resource").unwrap();
            log.append(1, b"one").unwrap();
            log.append(2, b"two").unwrap();
        }
        // remove the sidecar index to force a scan
        std::fs::remove_file(dir.path().join("resource.index")).unwrap();
        let log = StateHistoryLog::open(dir.path(), "resource").unwrap();
        assert_eq!(log.range(), Some((1, 2)));
        assert_eq!(log.read_block(1).unwrap(), b"one");

        let mut seen = Vec::new();
        log.read_range(1, 2, |block, payload| {
            seen.push((block, payload.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
    }
}

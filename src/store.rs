//! Local chunk storage: hash-to-offset index plus master data file reader.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::info;

use crate::{Error, Result};

/// Lookup service and byte-range reader the transport engine consumes when
/// serving GETs.
pub trait ChunkStore {
    /// Resolve a hex chunk hash to its byte offset in local storage.
    fn lookup(&self, chunk_hash: &str) -> Option<u64>;

    /// Read one chunk's bytes starting at `offset`.
    fn read_chunk(&self, offset: u64) -> Result<Bytes>;
}

/// Chunk store backed by a has-chunks index file and a master data file.
///
/// The index file holds one `<id> <hex-hash>` pair per line; chunk `id`
/// occupies bytes `[id * chunk_size, (id + 1) * chunk_size)` of the master
/// file.
#[derive(Debug)]
pub struct FileChunkStore {
    master_path: PathBuf,
    index: HashMap<String, u64>,
    chunk_size: usize,
}

impl FileChunkStore {
    pub fn load(index_path: &Path, master_path: &Path, chunk_size: usize) -> Result<Self> {
        let reader = BufReader::new(File::open(index_path)?);
        let mut index = HashMap::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (id, hash) = match (parts.next(), parts.next()) {
                (Some(id), Some(hash)) => (id, hash),
                _ => return Err(Error::BadIndex(format!("bad line: {line:?}"))),
            };
            let id: u64 = id
                .parse()
                .map_err(|_| Error::BadIndex(format!("bad chunk id in line: {line:?}")))?;
            index.insert(hash.to_ascii_lowercase(), id * chunk_size as u64);
        }

        info!(chunks = index.len(), master = %master_path.display(), "chunk index loaded");
        Ok(Self {
            master_path: master_path.to_path_buf(),
            index,
            chunk_size,
        })
    }
}

impl ChunkStore for FileChunkStore {
    fn lookup(&self, chunk_hash: &str) -> Option<u64> {
        self.index.get(&chunk_hash.to_ascii_lowercase()).copied()
    }

    fn read_chunk(&self, offset: u64) -> Result<Bytes> {
        // the master file is read-only; reopening per build keeps the store
        // free of long-lived handles
        let mut file = File::open(&self.master_path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut data = vec![0u8; self.chunk_size];
        let mut read = 0usize;
        while read < data.len() {
            let n = file.read(&mut data[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        data.truncate(read);
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HASH_A: &str = "de6f204b00ee4a1c8ea3e2f4f0d79455a0c856eb";
    const HASH_B: &str = "0a7c1bd9b8a676f3e1dd212f4f0d79455a0c1111";

    fn store(chunk_size: usize) -> (tempfile::TempDir, FileChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("node.haschunks");
        let master_path = dir.path().join("master.dat");

        let mut index = File::create(&index_path).unwrap();
        writeln!(index, "0 {HASH_A}").unwrap();
        writeln!(index, "1 {HASH_B}").unwrap();

        let mut master = File::create(&master_path).unwrap();
        master.write_all(&vec![0xAAu8; chunk_size]).unwrap();
        master.write_all(&vec![0xBBu8; chunk_size]).unwrap();

        let store = FileChunkStore::load(&index_path, &master_path, chunk_size).unwrap();
        (dir, store)
    }

    #[test]
    fn test_lookup_resolves_offsets() {
        let (_dir, store) = store(64);
        assert_eq!(store.lookup(HASH_A), Some(0));
        assert_eq!(store.lookup(HASH_B), Some(64));
        assert_eq!(store.lookup("ffff204b00ee4a1c8ea3e2f4f0d79455a0c856eb"), None);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let (_dir, store) = store(64);
        assert_eq!(store.lookup(&HASH_A.to_ascii_uppercase()), Some(0));
    }

    #[test]
    fn test_read_chunk_range() {
        let (_dir, store) = store(64);
        let chunk = store.read_chunk(64).unwrap();
        assert_eq!(chunk.len(), 64);
        assert!(chunk.iter().all(|&b| b == 0xBB));
    }
}

//! # Append-Only File Store
//!
//! Key-value store persisted as a single append-only log inside its
//! directory. Every write (single put/delete or a whole batch) is one frame:
//!
//! ```text
//! [payload_len: u32 LE][crc32(payload): u32 LE][payload]
//! payload = op*
//! op      = 0x01 [klen u32 LE][key][vlen u32 LE][value]   put
//!         | 0x02 [klen u32 LE][key]                       delete
//! ```
//!
//! A batch is applied on load only if its whole frame is present and its
//! checksum matches, which makes `atomic_batch_write` all-or-nothing across
//! crashes. A torn trailing frame is truncated away on open.

use crate::domain::errors::KVStoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, StoreOpener};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the log file inside the store directory.
pub const LOG_FILE_NAME: &str = "data.log";

const FRAME_HEADER_LEN: usize = 8;
const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// File-backed store holding all pairs in memory and appending each write.
pub struct FileKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    file: File,
    path: PathBuf,
}

impl FileKVStore {
    /// Open or create the store in `dir`.
    pub fn open(dir: &Path) -> Result<Self, KVStoreError> {
        fs::create_dir_all(dir).map_err(KVStoreError::io)?;
        let path = dir.join(LOG_FILE_NAME);

        let mut bytes = Vec::new();
        if path.exists() {
            File::open(&path)
                .and_then(|mut f| f.read_to_end(&mut bytes))
                .map_err(KVStoreError::io)?;
        }

        let mut data = BTreeMap::new();
        let valid_len = replay(&bytes, &mut data)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(KVStoreError::io)?;

        if valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - valid_len,
                "[qc-18] Truncating torn tail of data log store"
            );
            file.set_len(valid_len as u64).map_err(KVStoreError::io)?;
        }
        debug!(path = %path.display(), keys = data.len(), "[qc-18] File store opened");

        Ok(Self { data, file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, operations: &[BatchOperation]) -> Result<(), KVStoreError> {
        let mut payload = Vec::new();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    payload.push(OP_PUT);
                    put_bytes(&mut payload, key)?;
                    put_bytes(&mut payload, value)?;
                }
                BatchOperation::Delete { key } => {
                    payload.push(OP_DELETE);
                    put_bytes(&mut payload, key)?;
                }
            }
        }
        let len = u32::try_from(payload.len()).map_err(|_| KVStoreError::IOError {
            message: "batch exceeds 4 GiB".to_string(),
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame).map_err(KVStoreError::io)?;
        self.file.sync_data().map_err(KVStoreError::io)
    }

    fn apply(&mut self, operations: Vec<BatchOperation>) {
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), KVStoreError> {
    let len = u32::try_from(bytes.len()).map_err(|_| KVStoreError::IOError {
        message: "entry exceeds 4 GiB".to_string(),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Apply every complete frame in `bytes`; returns the length of the valid
/// prefix. A checksum mismatch on a complete frame is corruption, not a torn
/// write, and fails the open.
fn replay(bytes: &[u8], data: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<usize, KVStoreError> {
    let mut cursor = 0;
    while cursor + FRAME_HEADER_LEN <= bytes.len() {
        let len = read_u32(bytes, cursor) as usize;
        let crc = read_u32(bytes, cursor + 4);
        let start = cursor + FRAME_HEADER_LEN;
        let Some(payload) = bytes.get(start..start + len) else {
            break;
        };
        if crc32fast::hash(payload) != crc {
            if start + len == bytes.len() {
                // Last frame only partially reached the disk.
                break;
            }
            return Err(KVStoreError::CorruptionError {
                message: format!("checksum mismatch at offset {}", cursor),
            });
        }
        apply_payload(payload, data).ok_or_else(|| KVStoreError::CorruptionError {
            message: format!("malformed frame at offset {}", cursor),
        })?;
        cursor = start + len;
    }
    Ok(cursor)
}

fn apply_payload(payload: &[u8], data: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Option<()> {
    let mut ops = Vec::new();
    let mut cursor = 0;
    while cursor < payload.len() {
        let tag = payload[cursor];
        cursor += 1;
        let key = take(payload, &mut cursor)?;
        match tag {
            OP_PUT => {
                let value = take(payload, &mut cursor)?;
                ops.push(BatchOperation::put(key, value));
            }
            OP_DELETE => ops.push(BatchOperation::delete(key)),
            _ => return None,
        }
    }
    for op in ops {
        match op {
            BatchOperation::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOperation::Delete { key } => {
                data.remove(&key);
            }
        }
    }
    Some(())
}

fn take<'a>(payload: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let len_bytes = payload.get(*cursor..*cursor + 4)?;
    let len = u32::from_le_bytes(len_bytes.try_into().ok()?) as usize;
    *cursor += 4;
    let bytes = payload.get(*cursor..*cursor + len)?;
    *cursor += len;
    Some(bytes)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

impl KeyValueStore for FileKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::put(key, value)])
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::delete(key)])
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        if operations.is_empty() {
            return Ok(());
        }
        self.append(&operations)?;
        self.apply(operations);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Opens a [`FileKVStore`] in each directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStoreOpener;

impl StoreOpener for FileStoreOpener {
    fn open(&self, dir: &Path) -> Result<Box<dyn KeyValueStore>, KVStoreError> {
        Ok(Box::new(FileKVStore::open(dir)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reopen_restores_contents() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = FileKVStore::open(dir.path()).unwrap();
            store.put(b"a", b"1").unwrap();
            store
                .atomic_batch_write(vec![
                    BatchOperation::put(b"b".to_vec(), b"2".to_vec()),
                    BatchOperation::delete(b"a".to_vec()),
                ])
                .unwrap();
        }
        let store = FileKVStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_torn_batch_is_dropped_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        {
            let mut store = FileKVStore::open(dir.path()).unwrap();
            store.put(b"kept", b"yes").unwrap();
            store
                .atomic_batch_write(vec![
                    BatchOperation::put(b"x".to_vec(), b"1".to_vec()),
                    BatchOperation::put(b"y".to_vec(), b"2".to_vec()),
                ])
                .unwrap();
        }
        let full = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(full - 3)
            .unwrap();

        let mut store = FileKVStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"yes".to_vec()));
        assert!(!store.exists(b"x").unwrap());
        assert!(!store.exists(b"y").unwrap());

        // Writes after recovery land on a clean tail.
        store.put(b"z", b"3").unwrap();
        drop(store);
        let store = FileKVStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"z").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_corrupt_middle_frame_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        {
            let mut store = FileKVStore::open(dir.path()).unwrap();
            store.put(b"a", b"1").unwrap();
            store.put(b"b", b"2").unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        // Flip a byte inside the first frame's value.
        bytes[FRAME_HEADER_LEN + 1 + 4 + 1 + 4] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            FileKVStore::open(dir.path()),
            Err(KVStoreError::CorruptionError { .. })
        ));
    }

    #[test]
    fn test_prefix_scan_in_key_order() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStoreOpener.open(dir.path()).unwrap();
        store.put(b"TX\x02", b"c").unwrap();
        store.put(b"TX\x01", b"b").unwrap();
        store.put(b"gv\x01", b"g").unwrap();
        let keys: Vec<_> = store
            .prefix_scan(b"TX")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"TX\x01".to_vec(), b"TX\x02".to_vec()]);
    }
}

//! File-per-key durable store
//!
//! Every key lives in its own file named `{xxh64(key):016x}-{chain}.entry`.
//! Keys whose hashes collide take consecutive chain indexes starting at 0;
//! removing an entry from the middle of a chain moves the last file of the
//! chain into the gap so lookups can stop at the first missing index.
//!
//! Entry file format:
//! ```text
//! +---------------------------+--------+
//! | bincode((key, value))     | CRC32C |
//! | var                       | 4B     |
//! +---------------------------+--------+
//! ```

use super::{DurableStore, StoreLimits};
use bytes::Bytes;
use parking_lot::RwLock;
use shardkv_common::{Error, Key, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xxhash_rust::xxh64::xxh64;

/// Entry file extension
const ENTRY_EXT: &str = "entry";

/// Durable store keeping one checksummed file per key
pub struct FileStore {
    dir: PathBuf,
    limits: StoreLimits,
    /// Chain walks share it, chain rewrites hold it exclusively; keys on
    /// different cache shards may share a chain
    chain_lock: RwLock<()>,
    hash: fn(&[u8]) -> u64,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>, limits: StoreLimits) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::storage(format!("failed to create {}: {e}", dir.display())))?;

        info!(dir = %dir.display(), "opened file store");
        Ok(Self {
            dir,
            limits,
            chain_lock: RwLock::new(()),
            hash: |key| xxh64(key, 0),
        })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of entry files on disk
    pub fn entry_count(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        for entry in entries {
            if entry?.path().extension().is_some_and(|ext| ext == ENTRY_EXT) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn hash_key(&self, key: &Key) -> u64 {
        (self.hash)(key.as_bytes())
    }

    fn entry_path(&self, hash: u64, chain: usize) -> PathBuf {
        self.dir.join(format!("{hash:016x}-{chain}.{ENTRY_EXT}"))
    }

    /// Walk the chain for `key`, returning the slot holding it and the chain length
    ///
    /// The caller holds `chain_lock`.
    fn locate(&self, key: &Key) -> Result<(Option<(usize, Bytes)>, usize)> {
        let hash = self.hash_key(key);
        let mut found = None;
        let mut chain = 0;

        loop {
            let path = self.entry_path(hash, chain);
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            };

            if found.is_none() {
                let (stored_key, value) = decode_entry(&data).ok_or_else(|| {
                    Error::storage(format!("corrupt entry file {}", path.display()))
                })?;
                if stored_key == *key {
                    found = Some((chain, Bytes::from(value)));
                }
            }
            chain += 1;
        }

        Ok((found, chain))
    }

    fn write_entry(&self, path: &Path, key: &Key, value: &[u8]) -> Result<()> {
        let data = encode_entry(key, value)?;
        let temp_path = path.with_extension("tmp");

        let write = || -> std::io::Result<()> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&data)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            drop(writer);

            // Atomic rename
            std::fs::rename(&temp_path, path)?;
            self.sync_dir()
        };

        write().map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            Error::durable_write(format!("{}: {e}", path.display()))
        })
    }

    fn sync_dir(&self) -> std::io::Result<()> {
        File::open(&self.dir)?.sync_all()
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &Key) -> Result<Bytes> {
        self.limits.check_key(key)?;
        let _chain = self.chain_lock.read();
        let (found, _) = self.locate(key)?;
        found.map(|(_, value)| value).ok_or(Error::NotFound)
    }

    fn put_check(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.limits.check_entry(key, value)
    }

    fn put(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.limits.check_entry(key, value)?;

        let _chain = self.chain_lock.write();
        let (found, len) = self.locate(key)?;
        let slot = found.map_or(len, |(slot, _)| slot);
        let path = self.entry_path(self.hash_key(key), slot);

        self.write_entry(&path, key, value)?;
        debug!(key = %key, slot, bytes = value.len(), "store put");
        Ok(())
    }

    fn del_check(&self, key: &Key) -> Result<()> {
        self.limits.check_key(key)?;
        let _chain = self.chain_lock.read();
        let (found, _) = self.locate(key)?;
        found.map(|_| ()).ok_or(Error::NotFound)
    }

    fn del(&self, key: &Key) -> Result<()> {
        self.limits.check_key(key)?;

        let _chain = self.chain_lock.write();
        let (found, len) = self.locate(key)?;
        let (slot, _) = found.ok_or(Error::NotFound)?;
        let hash = self.hash_key(key);
        let path = self.entry_path(hash, slot);
        let last = len - 1;

        let result = if slot == last {
            std::fs::remove_file(&path)
        } else {
            std::fs::rename(self.entry_path(hash, last), &path)
        };
        result
            .and_then(|()| self.sync_dir())
            .map_err(|e| Error::durable_write(format!("{}: {e}", path.display())))?;

        debug!(key = %key, slot, "store delete");
        Ok(())
    }

    fn clean(&self) -> Result<()> {
        let _chain = self.chain_lock.write();
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&self.dir)?;
        info!(dir = %self.dir.display(), "file store cleaned");
        Ok(())
    }
}

fn encode_entry(key: &Key, value: &[u8]) -> Result<Vec<u8>> {
    let mut buf = bincode::serialize(&(key, value))
        .map_err(|e| Error::storage(format!("failed to encode entry: {e}")))?;
    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

fn decode_entry(data: &[u8]) -> Option<(Key, Vec<u8>)> {
    let body_len = data.len().checked_sub(4)?;
    let (body, trailer) = data.split_at(body_len);
    let stored_crc = u32::from_le_bytes(trailer.try_into().ok()?);
    if crc32c::crc32c(body) != stored_crc {
        return None;
    }
    bincode::deserialize(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn open(dir: &Path) -> FileStore {
        FileStore::open(dir.join("store"), StoreLimits::default()).unwrap()
    }

    /// Store where every key lands on the same chain
    fn open_colliding(dir: &Path) -> FileStore {
        let mut store = open(dir);
        store.hash = |_| 0;
        store
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let key = Key::from("alpha");

        assert!(store.get(&key).unwrap_err().is_not_found());
        store.put(&key, b"one").unwrap();
        assert_eq!(store.get(&key).unwrap(), Bytes::from_static(b"one"));

        store.put(&key, b"two").unwrap();
        assert_eq!(store.get(&key).unwrap(), Bytes::from_static(b"two"));
        assert_eq!(store.entry_count().unwrap(), 1);

        store.del_check(&key).unwrap();
        store.del(&key).unwrap();
        assert!(store.get(&key).unwrap_err().is_not_found());
        assert!(store.del(&key).unwrap_err().is_not_found());
        assert!(store.del_check(&key).unwrap_err().is_not_found());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store.put(&Key::from("a"), b"1").unwrap();
            store.put(&Key::from("b"), b"2").unwrap();
        }

        let store = open(dir.path());
        assert_eq!(store.get(&Key::from("a")).unwrap(), Bytes::from_static(b"1"));
        assert_eq!(store.get(&Key::from("b")).unwrap(), Bytes::from_static(b"2"));
    }

    #[test]
    fn test_collision_chain_compacts_on_delete() {
        let dir = tempdir().unwrap();
        let store = open_colliding(dir.path());

        let keys = [Key::from("x"), Key::from("y"), Key::from("z")];
        for key in &keys {
            store.put(key, key.as_bytes()).unwrap();
        }

        let (found, len) = store.locate(&keys[1]).unwrap();
        assert_eq!(found.map(|(slot, _)| slot), Some(1));
        assert_eq!(len, 3);

        // Deleting the head moves the tail into slot 0
        store.del(&keys[0]).unwrap();
        assert!(!store.entry_path(0, 2).exists());
        let data = std::fs::read(store.entry_path(0, 0)).unwrap();
        assert_eq!(decode_entry(&data).unwrap().0, keys[2]);
        assert_eq!(store.entry_count().unwrap(), 2);

        assert!(store.get(&keys[0]).unwrap_err().is_not_found());
        assert_eq!(store.get(&keys[1]).unwrap(), Bytes::from_static(b"y"));
        assert_eq!(store.get(&keys[2]).unwrap(), Bytes::from_static(b"z"));
    }

    #[test]
    fn test_chain_compaction_hidden_from_readers() {
        const ROUNDS: usize = 100;
        let dir = tempdir().unwrap();
        let store = Arc::new(open_colliding(dir.path()));
        let start = Arc::new(Barrier::new(3));
        let end = Arc::new(Barrier::new(3));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let (store, start, end, done) = (
                    Arc::clone(&store),
                    Arc::clone(&start),
                    Arc::clone(&end),
                    Arc::clone(&done),
                );
                thread::spawn(move || {
                    let key = Key::from("moved");
                    for _ in 0..ROUNDS {
                        start.wait();
                        loop {
                            assert_eq!(store.get(&key).unwrap(), Bytes::from_static(b"m"));
                            store.del_check(&key).unwrap();
                            if done.load(Ordering::SeqCst) {
                                break;
                            }
                        }
                        end.wait();
                    }
                })
            })
            .collect();

        let (head, moved) = (Key::from("head"), Key::from("moved"));
        for _ in 0..ROUNDS {
            store.put(&head, b"h").unwrap();
            store.put(&moved, b"m").unwrap();
            done.store(false, Ordering::SeqCst);
            start.wait();

            // Renames "moved" from slot 1 into slot 0 while readers walk the chain
            store.del(&head).unwrap();
            done.store(true, Ordering::SeqCst);
            end.wait();
            store.del(&moved).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_corrupt_entry_is_reported() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let key = Key::from("k");
        store.put(&key, b"value").unwrap();

        let path = store.entry_path(xxh64(key.as_bytes(), 0), 0);
        let mut data = std::fs::read(&path).unwrap();
        data[0] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(store.get(&key), Err(Error::Storage(_))));
    }

    #[test]
    fn test_admission_limits() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(
            dir.path(),
            StoreLimits {
                max_key_len: 3,
                max_value_len: 3,
            },
        )
        .unwrap();

        assert!(store.put_check(&Key::from("abc"), b"123").is_ok());
        assert!(matches!(
            store.put(&Key::from("abcd"), b"1"),
            Err(Error::KeyTooLong { .. })
        ));
        assert!(matches!(
            store.put_check(&Key::from("a"), b"1234"),
            Err(Error::ValueTooLong { .. })
        ));
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_clean() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store.put(&Key::from("a"), b"1").unwrap();
        store.clean().unwrap();

        assert_eq!(store.entry_count().unwrap(), 0);
        assert!(store.get(&Key::from("a")).unwrap_err().is_not_found());
        store.put(&Key::from("a"), b"2").unwrap();
        assert_eq!(store.get(&Key::from("a")).unwrap(), Bytes::from_static(b"2"));
    }
}

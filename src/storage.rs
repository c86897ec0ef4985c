//! Storage layer for settlement records, backed by RocksDB.

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct DuelStorage {
    db: Arc<DB>,
}

impl DuelStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.get(key).ok().flatten()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), rocksdb::Error> {
        self.db.put(key, value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), rocksdb::Error> {
        self.db.delete(key)
    }

    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> Result<(), rocksdb::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db.write(batch)
    }

    /// Scan up to `limit` entries under `prefix`, starting strictly after
    /// `start_after` when a cursor is supplied.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mode = match start_after {
            Some(cursor) => IteratorMode::From(cursor, Direction::Forward),
            None => IteratorMode::From(prefix, Direction::Forward),
        };

        let mut rows = Vec::with_capacity(limit);
        for item in self.db.iterator(mode) {
            let Ok((key, value)) = item else {
                break;
            };
            if !key.starts_with(prefix) {
                break;
            }
            // Cursors point at the last key already returned.
            if let Some(cursor) = start_after {
                if key.as_ref() == cursor {
                    continue;
                }
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }

        rows
    }
}

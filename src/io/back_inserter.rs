//! A double-buffered sequential writer: records are appended into an
//! in-memory buffer, and once it fills, the buffer is handed off to a
//! background I/O thread to flush while a second buffer keeps
//! accepting new records. This keeps the producer/sorter stages of
//! ingestion from blocking on disk writes.

use std::sync::Arc;

use crate::error::Result;

use super::file::OutputFile;
use super::span::FixedSizeRecord;
use super::threadpool::{IoFuture, IoThreadPool};

/// Appends fixed-size records to an [`OutputFile`], double-buffering
/// writes through an [`IoThreadPool`].
pub struct BackInserter<T: FixedSizeRecord> {
    file: Arc<OutputFile>,
    pool: Arc<IoThreadPool>,
    capacity_bytes: usize,
    active: Vec<u8>,
    pending_flush: Option<IoFuture<Result<()>>>,
    len: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: FixedSizeRecord + Send + 'static> BackInserter<T> {
    pub fn new(file: Arc<OutputFile>, pool: Arc<IoThreadPool>, capacity_bytes: usize) -> Self {
        BackInserter {
            file,
            pool,
            capacity_bytes: capacity_bytes.max(T::ENCODED_SIZE),
            active: Vec::with_capacity(capacity_bytes),
            pending_flush: None,
            len: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Number of records appended so far (including ones still
    /// in-flight to disk).
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Append one record, flushing the active buffer to a background
    /// worker if it has filled.
    pub fn push(&mut self, record: &T) -> Result<()> {
        let mut scratch = vec![0u8; T::ENCODED_SIZE];
        record.encode(&mut scratch);
        self.active.extend_from_slice(&scratch);
        self.len += 1;
        if self.active.len() >= self.capacity_bytes {
            self.flush_active()?;
        }
        Ok(())
    }

    fn flush_active(&mut self) -> Result<()> {
        if self.active.is_empty() {
            return Ok(());
        }
        self.wait_pending()?;
        let batch = std::mem::replace(&mut self.active, Vec::with_capacity(self.capacity_bytes));
        let file = Arc::clone(&self.file);
        self.pending_flush = Some(self.pool.submit(move || file.append(&batch)));
        Ok(())
    }

    fn wait_pending(&mut self) -> Result<()> {
        if let Some(future) = self.pending_flush.take() {
            future.join()?;
        }
        Ok(())
    }

    /// Flush all buffered records (waiting for any in-flight write) and
    /// seal the underlying file for reading.
    pub fn finish(mut self) -> Result<super::file::ImmutableFile> {
        self.flush_active()?;
        self.wait_pending()?;
        let file = Arc::try_unwrap(self.file)
            .unwrap_or_else(|_| panic!("BackInserter::finish called while file still shared"));
        file.seal()
    }
}

//! Typed, fixed-size-record views over a contiguous range of an
//! [`ImmutableFile`], plus a batching sequential iterator over one.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Result;

use super::file::ImmutableFile;

/// A type that can be packed to and unpacked from a fixed-width byte
/// record, suitable for storage in a run or index file.
pub trait FixedSizeRecord: Sized {
    const ENCODED_SIZE: usize;
    fn encode(&self, out: &mut [u8]);
    fn decode(bytes: &[u8]) -> Self;
}

impl FixedSizeRecord for crate::entry::Entry {
    const ENCODED_SIZE: usize = crate::entry::ENTRY_DISK_SIZE;

    fn encode(&self, out: &mut [u8]) {
        out.copy_from_slice(&(*self).to_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        crate::entry::Entry::from_bytes(bytes.try_into().expect("entry-sized slice"))
    }
}

/// A half-open window of record indices `[begin, end)` into a shared,
/// immutable, fixed-record-size file. Cheap to slice further (no I/O
/// happens until [`Self::get`] or [`Self::iter`] is called).
pub struct ImmutableSpan<T: FixedSizeRecord> {
    file: Arc<ImmutableFile>,
    begin: u64,
    end: u64,
    _marker: PhantomData<T>,
}

impl<T: FixedSizeRecord> Clone for ImmutableSpan<T> {
    fn clone(&self) -> Self {
        ImmutableSpan { file: Arc::clone(&self.file), begin: self.begin, end: self.end, _marker: PhantomData }
    }
}

impl<T: FixedSizeRecord> ImmutableSpan<T> {
    /// The whole file, interpreted as a sequence of `T` records.
    pub fn whole_file(file: Arc<ImmutableFile>) -> Self {
        let end = file.len() / T::ENCODED_SIZE as u64;
        ImmutableSpan { file, begin: 0, end, _marker: PhantomData }
    }

    pub fn new(file: Arc<ImmutableFile>, begin: u64, end: u64) -> Self {
        ImmutableSpan { file, begin, end, _marker: PhantomData }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// The absolute record index of this span's first element, in the
    /// underlying file.
    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Random-access read of the `index`-th record within this span.
    pub fn get(&self, index: u64) -> Result<T> {
        debug_assert!(index < self.len());
        let mut buf = vec![0u8; T::ENCODED_SIZE];
        self.file.read_at(&mut buf, (self.begin + index) * T::ENCODED_SIZE as u64)?;
        Ok(T::decode(&buf))
    }

    /// A narrower view `[begin+lo, begin+hi)` of this span.
    pub fn subspan(&self, lo: u64, hi: u64) -> Self {
        debug_assert!(lo <= hi && self.begin + hi <= self.end);
        ImmutableSpan { file: Arc::clone(&self.file), begin: self.begin + lo, end: self.begin + hi, _marker: PhantomData }
    }

    /// A batching sequential iterator, reading up to `read_max_bytes`
    /// worth of records per underlying `read_at` call.
    pub fn iter(&self, read_max_bytes: usize) -> SpanIter<T> {
        let batch_records = (read_max_bytes / T::ENCODED_SIZE).max(1) as u64;
        SpanIter {
            file: Arc::clone(&self.file),
            next: self.begin,
            end: self.end,
            batch_records,
            buffer: Vec::new(),
            buffer_start: self.begin,
            _marker: PhantomData,
        }
    }
}

/// A forward iterator over an [`ImmutableSpan`] that amortizes I/O by
/// reading a batch of records at a time instead of one `read_at` call
/// per element.
pub struct SpanIter<T: FixedSizeRecord> {
    file: Arc<ImmutableFile>,
    next: u64,
    end: u64,
    batch_records: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    _marker: PhantomData<T>,
}

impl<T: FixedSizeRecord> Iterator for SpanIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let in_buffer = self.next >= self.buffer_start
            && self.next < self.buffer_start + (self.buffer.len() / T::ENCODED_SIZE) as u64;
        if !in_buffer {
            let count = self.batch_records.min(self.end - self.next);
            self.buffer_start = self.next;
            match self.file.read_records(T::ENCODED_SIZE, self.next, count) {
                Ok(bytes) => self.buffer = bytes,
                Err(e) => return Some(Err(e)),
            }
        }
        let offset_in_buffer = ((self.next - self.buffer_start) as usize) * T::ENCODED_SIZE;
        let record = T::decode(&self.buffer[offset_in_buffer..offset_in_buffer + T::ENCODED_SIZE]);
        self.next += 1;
        Some(Ok(record))
    }
}

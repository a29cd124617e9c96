//! File wrappers built on top of [`super::handle_pool`]: a read-only
//! view with a known length, an append-only output, and a combined
//! random-read/append handle used while a run is still being written.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PosDbError, Result};

use super::handle_pool::{HandlePool, OpenMode, PoolKey};

fn read_fully(file: &mut std::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// A read-only pooled file whose length is fixed at open time. Runs and
/// range-index files are always accessed through one of these once
/// sealed.
pub struct ImmutableFile {
    path: PathBuf,
    pool: Arc<HandlePool>,
    pool_key: PoolKey,
    len: u64,
}

impl ImmutableFile {
    pub fn open(pool: Arc<HandlePool>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path)
            .map_err(|e| PosDbError::OpenFailed { path: path.clone(), mode: "read", source: e })?;
        let pool_key = pool.register(path.clone(), OpenMode::ReadOnly);
        Ok(ImmutableFile { path, pool, pool_key, len: meta.len() })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let handle = self.pool.acquire(self.pool_key)?;
        let mut file = handle.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let n = read_fully(&mut file, buf)?;
        if n != buf.len() {
            return Err(PosDbError::ReadShort {
                path: self.path.clone(),
                offset,
                requested: buf.len(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Read a whole span of `count` fixed-size records starting at
    /// record index `start`, into a freshly allocated buffer.
    pub fn read_records(&self, record_size: usize, start: u64, count: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; record_size * count as usize];
        self.read_at(&mut buf, start * record_size as u64)?;
        Ok(buf)
    }
}

impl Drop for ImmutableFile {
    fn drop(&mut self) {
        self.pool.unregister(self.pool_key);
    }
}

/// An append-only pooled file, written sequentially during ingestion or
/// compaction and sealed into an [`ImmutableFile`] once complete.
pub struct OutputFile {
    path: PathBuf,
    pool: Arc<HandlePool>,
    pool_key: PoolKey,
}

impl OutputFile {
    pub fn create(pool: Arc<HandlePool>, path: impl Into<PathBuf>, truncate: bool) -> Result<Self> {
        let path = path.into();
        {
            let mut opts = std::fs::OpenOptions::new();
            opts.create(true).write(true).truncate(truncate);
            opts.open(&path)
                .map_err(|e| PosDbError::OpenFailed { path: path.clone(), mode: "create", source: e })?;
        }
        let pool_key = pool.register(path.clone(), OpenMode::ReadWrite);
        Ok(OutputFile { path, pool, pool_key })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` to the end of the file.
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        let handle = self.pool.acquire(self.pool_key)?;
        let mut file = handle.lock().unwrap();
        file.seek(SeekFrom::End(0))?;
        file.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let handle = self.pool.acquire(self.pool_key)?;
        let mut file = handle.lock().unwrap();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Close this handle and reopen the same path read-only, checking
    /// that nothing else still has it open for writing.
    pub fn seal(self) -> Result<ImmutableFile> {
        self.flush()?;
        let path = self.path.clone();
        let pool = Arc::clone(&self.pool);
        drop(self);
        ImmutableFile::open(pool, path)
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        self.pool.unregister(self.pool_key);
    }
}

/// A combined random-read/append pooled file, used for the header log
/// (appended to as games ingest, read back by offset at query time) and
/// for in-progress runs before they're sealed.
pub struct InputOutputFile {
    path: PathBuf,
    pool: Arc<HandlePool>,
    pool_key: PoolKey,
}

impl InputOutputFile {
    pub fn open(pool: Arc<HandlePool>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        {
            std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .read(true)
                .open(&path)
                .map_err(|e| PosDbError::OpenFailed { path: path.clone(), mode: "create", source: e })?;
        }
        let pool_key = pool.register(path.clone(), OpenMode::ReadWrite);
        Ok(InputOutputFile { path, pool, pool_key })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let handle = self.pool.acquire(self.pool_key)?;
        let mut file = handle.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let n = read_fully(&mut file, buf)?;
        if n != buf.len() {
            return Err(PosDbError::ReadShort {
                path: self.path.clone(),
                offset,
                requested: buf.len(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Append `bytes`, returning the offset at which they were written.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let handle = self.pool.acquire(self.pool_key)?;
        let mut file = handle.lock().unwrap();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(bytes)?;
        Ok(offset)
    }

    /// Overwrite `bytes` at `offset`, without changing the file's length.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let handle = self.pool.acquire(self.pool_key)?;
        let mut file = handle.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Truncate (or extend) to `new_len` bytes.
    pub fn truncate(&self, new_len: u64) -> Result<()> {
        let handle = self.pool.acquire(self.pool_key)?;
        let file = handle.lock().unwrap();
        file.set_len(new_len)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let handle = self.pool.acquire(self.pool_key)?;
        let mut file = handle.lock().unwrap();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

impl Drop for InputOutputFile {
    fn drop(&mut self) {
        self.pool.unregister(self.pool_key);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::handle_pool::HandlePool;
    use tempfile::tempdir;

    #[test]
    fn output_file_seals_into_readable_immutable_file() {
        let dir = tempdir().unwrap();
        let pool = HandlePool::new(8);
        let path = dir.path().join("run.bin");

        let out = OutputFile::create(Arc::clone(&pool), &path, true).unwrap();
        out.append(b"hello ").unwrap();
        out.append(b"world").unwrap();
        let immut = out.seal().unwrap();

        assert_eq!(immut.len(), 11);
        let mut buf = [0u8; 5];
        immut.read_at(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn input_output_file_supports_random_read_and_truncate() {
        let dir = tempdir().unwrap();
        let pool = HandlePool::new(8);
        let path = dir.path().join("inout.bin");

        let f = InputOutputFile::open(Arc::clone(&pool), &path).unwrap();
        let off_a = f.append(b"aaaa").unwrap();
        let off_b = f.append(b"bbbb").unwrap();
        assert_eq!(off_a, 0);
        assert_eq!(off_b, 4);

        let mut buf = [0u8; 4];
        f.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"aaaa");

        f.truncate(4).unwrap();
        assert_eq!(f.len().unwrap(), 4);
    }

    #[test]
    fn read_at_past_end_reports_short_read() {
        let dir = tempdir().unwrap();
        let pool = HandlePool::new(8);
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"abc").unwrap();

        let immut = ImmutableFile::open(pool, &path).unwrap();
        let mut buf = [0u8; 8];
        assert!(immut.read_at(&mut buf, 0).is_err());
    }
}

//! Explicit configuration for a [`crate::database`], threaded through
//! construction rather than read from process-global state.

use std::fmt;
use std::str::FromStr;

use crate::error::PosDbError;

/// A byte count parsed from human-readable unit suffixes, e.g. `"4GiB"`,
/// `"512MiB"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryAmount(u64);

impl MemoryAmount {
    /// Construct directly from a byte count.
    pub const fn bytes(n: u64) -> Self {
        MemoryAmount(n)
    }

    /// The number of bytes this amount represents.
    pub const fn as_bytes(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemoryAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

impl FromStr for MemoryAmount {
    type Err = PosDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, unit) = s
            .find(|c: char| !c.is_ascii_digit())
            .map(|i| s.split_at(i))
            .unwrap_or((s, ""));
        let value: u64 = digits
            .parse()
            .map_err(|_| PosDbError::StringError(format!("invalid memory amount: {s:?}")))?;
        let multiplier: u64 = match unit.trim() {
            "" | "B" => 1,
            "KiB" => 1024,
            "MiB" => 1024 * 1024,
            "GiB" => 1024 * 1024 * 1024,
            "TiB" => 1024u64.pow(4),
            other => {
                return Err(PosDbError::StringError(format!(
                    "unrecognized memory unit {other:?} in {s:?}"
                )))
            }
        };
        Ok(MemoryAmount(value * multiplier))
    }
}

/// Runtime configuration threaded explicitly through [`crate::database::Database`]
/// construction and ingest, rather than read from global state.
#[derive(Debug, Clone)]
pub struct Config {
    /// `G`: range index ranges are split at most this many entries apart,
    /// except when all entries in a range compare equal.
    pub index_granularity: u64,
    /// `M`: in-memory buffer size used by the external sort stage of
    /// ingestion.
    pub max_merge_buffer_size: MemoryAmount,
    /// Memory budget handed to the external PGN parser.
    pub pgn_parser_memory: MemoryAmount,
    /// Cap on concurrently open "pooled" OS file handles.
    pub pool_max_open_files: u32,
    /// Cap on concurrently open "direct" (non-pooled) OS file handles.
    pub direct_max_open_files: u32,
    /// Number of worker threads in the async I/O threadpool.
    pub io_threadpool_size: u32,
    /// `F`: max fan-in for a single external-merge pass before recursing.
    pub merge_max_fan_in: u32,
    /// Above this many runs, merge uses a priority queue; at or below,
    /// a linear scan over candidates is used instead.
    pub merge_priority_queue_threshold: u32,
    /// Threshold, in bytes, below which a lookup window is read
    /// sequentially rather than further subdivided.
    pub sequential_read_max_bytes: u32,
    /// Number of producer worker threads used by parallel ingest.
    pub ingest_producer_threads: u32,
    /// Number of sorter worker threads used by ingest.
    pub ingest_sorter_threads: u32,
    /// When set, ingest additionally records the full 64-byte piece
    /// placement alongside each entry, and queries may verify a sampled
    /// fraction of hits against it to detect hash collisions. Off by
    /// default: the design treats the 128-bit hash as the position's
    /// identity.
    pub verify_position_hash: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            index_granularity: 4096,
            max_merge_buffer_size: MemoryAmount::bytes(64 * 1024 * 1024),
            pgn_parser_memory: MemoryAmount::bytes(16 * 1024 * 1024),
            pool_max_open_files: 256,
            direct_max_open_files: 128,
            io_threadpool_size: 8,
            merge_max_fan_in: 192,
            merge_priority_queue_threshold: 32,
            sequential_read_max_bytes: 32 * 1024,
            ingest_producer_threads: 1,
            ingest_sorter_threads: 1,
            verify_position_hash: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_memory_amounts() {
        assert_eq!("4GiB".parse::<MemoryAmount>().unwrap().as_bytes(), 4 * 1024 * 1024 * 1024);
        assert_eq!("512MiB".parse::<MemoryAmount>().unwrap().as_bytes(), 512 * 1024 * 1024);
        assert_eq!("100".parse::<MemoryAmount>().unwrap().as_bytes(), 100);
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.merge_max_fan_in, 192);
        assert_eq!(cfg.merge_priority_queue_threshold, 32);
        assert_eq!(cfg.sequential_read_max_bytes, 32_768);
    }
}

//! External-memory I/O primitives: pooled file handles, typed fixed-size
//! record spans, a double-buffered sequential writer, a background I/O
//! thread pool, and external sort/merge over those primitives.

pub mod back_inserter;
pub mod file;
pub mod handle_pool;
pub mod sort;
pub mod span;
pub mod threadpool;

pub use back_inserter::BackInserter;
pub use file::{ImmutableFile, InputOutputFile, OutputFile};
pub use handle_pool::{DirectFileLimiter, HandlePool, OpenMode, PoolKey};
pub use span::{FixedSizeRecord, ImmutableSpan, SpanIter};
pub use threadpool::{IoFuture, IoThreadPool};

//! The two on-disk database layouts, sharing one ingest/query surface
//! via [`crate::ingest::ClassifiedPartitions`] and [`crate::query::QueryBackend`].
//!
//! Format-A partitions entries by classification directory and keeps
//! one header store shared across every tier. Format-B keeps a single
//! shared partition (the classification lives inside the key itself)
//! and one header store per tier, since each tier's games are numbered
//! independently.

pub mod format_a;
pub mod format_b;

pub use format_a::FormatADatabase;
pub use format_b::FormatBDatabase;

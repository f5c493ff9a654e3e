//! oxilipp - A concurrent, in-memory learned index
//!
//! A learned index maps a totally-ordered numeric key to its slot by
//! *predicting* the position with a per-node linear model instead of
//! comparing along a search tree. Keys whose predictions collide are pushed
//! into recursively built child nodes, so lookups and point inserts run in
//! expected O(1) work per traversal step on well-behaved distributions.
//!
//! # Features
//!
//! - Concurrent lookups and inserts with optimistic version locking
//! - Epoch-based memory reclamation (no reader ever observes a freed node)
//! - FMCD (Fastest Minimum Conflict Degree) model fitting for bulk loads,
//!   with a three-point fallback
//! - Adaptive subtree rebuilds when a node's statistics degrade
//!
//! # Quick Start
//!
//! ```rust
//! use oxilipp::LippIndex;
//!
//! let index: LippIndex<u64, u64> = LippIndex::new();
//! index.insert(1, 10);
//! index.insert(2, 20);
//! assert_eq!(index.lookup(1), Some(10));
//! assert!(!index.exists(3));
//! ```

#![warn(missing_docs)]

pub mod bitmap;
pub mod config;
pub mod epoch;
pub mod index;
pub mod key;
pub mod model;
pub mod sync;

// Re-exports for convenience
pub use config::LippConfig;
pub use index::{IndexStats, LippIndex};
pub use key::{IndexKey, IndexValue};

/// Constants used throughout the library
pub mod constants {
    /// Maximum tree depth for a single descent; exceeding it is a usage
    /// violation and aborts.
    pub const MAX_DEPTH: usize = 128;

    /// Maximum number of threads supported by the epoch manager
    pub const MAX_THREADS: usize = 96;

    /// Slot-array length of a two-key node
    pub const TWO_NODE_ITEMS: usize = 8;

    /// Nodes built over more data than this are marked `fixed` and never
    /// trigger a rebuild.
    pub const FIXED_SIZE_THRESHOLD: usize = 1_000_000;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::LippConfig;
    pub use crate::index::{IndexStats, LippIndex};
    pub use crate::key::{IndexKey, IndexValue};
}

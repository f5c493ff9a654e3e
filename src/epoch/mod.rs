//! Epoch-based memory reclamation
//!
//! Three rotating epochs protect optimistic readers from use-after-free:
//! a node scheduled for deletion during epoch `e` is physically freed only
//! once every thread has left epoch `e`, which takes two full epoch
//! advances. Every public index operation holds an [`EpochGuard`] for its
//! whole duration.

mod ebr;

pub use ebr::{get_thread_id, try_get_thread_id, EpochError, EpochGuard, EpochManager};

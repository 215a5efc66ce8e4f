//! Token-budgeted context memory.
//!
//! Items are appended with a type tag and kept under an item-count and a
//! token ceiling. When either is exceeded, older items are ranked by an
//! importance score and the lowest are dropped, while the most recent
//! `keep_recent_items` always survive verbatim. Dropped items can be
//! condensed into a summary in the background.

pub mod item;
pub mod scoring;
pub mod store;

pub use item::{MemoryItem, MemoryItemType, Summary};
pub use scoring::ImportanceWeights;
pub use store::{ContextMemory, MemoryConfig};

//! Storage Module
//!
//! Immutable, range-bounded on-disk blocks and the manifest that records
//! which block belongs to which tier.
//!
//! ## Responsibilities
//! - Encode and parse block files
//! - Lazy, cached loading of block contents
//! - Durable registry of live blocks (manifest)
//!
//! ## Block File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ apple:red\n             live record    │
//! │ banana\n                tombstone      │
//! │ cherry:\n               empty value    │
//! │ ... ascending keys, one line per key   │
//! └────────────────────────────────────────┘
//! ```
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── MANIFEST
//!   └── blocks/
//!         ├── block_000001.blk
//!         └── block_000002.blk
//! ```

mod block;
mod manifest;
mod records;

pub use block::{Block, BlockDescriptor, BlockFactory, BlockId};
pub use manifest::{Manifest, ManifestEdit};
pub use records::{validate_key, validate_value, Records};

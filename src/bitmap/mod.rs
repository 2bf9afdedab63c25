//! Allocation Bitmap Module
//!
//! One bit per physical block, mirrored between memory and a bitmap file.
//!
//! ## Responsibilities
//! - First-fit search for free runs
//! - Mark/unmark extents as allocated
//! - Zero-extend on container growth
//! - Persist dirty byte ranges; self-heal a mis-sized file at mount
//!
//! ## Invariant
//! Every block referenced by a live file record is marked. Marked blocks
//! nobody references (overwrites, interrupted saves) are leaks that only
//! vacuum or repair reclaim.

mod file;
mod map;

pub use file::BitmapFile;
pub use map::AllocationBitmap;

//! Virtual Disk Module
//!
//! One container file + its bitmap + its index, serving blob I/O.
//!
//! ## Responsibilities
//! - Format an empty container / mount and validate an existing one
//! - First-fit allocation with growth at end-of-disk
//! - Extent-mapped reads through [`ExtentStream`]
//! - Compaction into a fresh contiguous container (vacuum)
//!
//! ## Lifecycle
//! ```text
//! Unmounted ──(empty: format | existing: mount)──▶ Mounted ──close()──▶ Disposed
//! ```

mod engine;
mod stream;
mod vacuum;

pub use engine::{DiskStats, VirtualDisk};
pub use stream::ExtentStream;
pub use vacuum::VacuumReport;

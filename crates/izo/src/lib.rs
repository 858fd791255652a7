//! Builder for images that are simultaneously a bootable ISO 9660 volume
//! and a valid stored-method ZIP archive of the same file tree.
//!
//! The trick is placement: every ISO file extent is preceded by one sector
//! whose tail holds the entry's ZIP local header, the central directory
//! hides in the slack before the image end, and readers of either format
//! skip the bytes that belong to the other.

pub mod builder;
pub mod eltorito;
pub mod error;
pub mod lba;
pub mod path;
pub mod spec;
pub mod tree;
pub mod zip;

pub use builder::{ImageBuilder, ImageOptions, ImageSize};
pub use error::{Error, Result};
pub use path::IsoPath;
pub use tree::OrphanPolicy;

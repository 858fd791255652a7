//! In-memory directory tree and the deferred layout finalizer.
//!
//! The tree is built incrementally while the source is walked; directory
//! extents are unknown until the whole tree has been discovered, so every
//! directory's placeholder record carries a zero extent until
//! [`DirTree::finalize`] runs.

use std::io::{Seek, SeekFrom, Write};

use crate::error::{Error, Result};
use crate::lba::LbaAllocator;
use crate::path::IsoPath;
use crate::spec::{
  self, ArrayStringU255, DirectoryRecord, FileFlags, LsbMsb32, PathTableEntry, RecordingDate,
  SECTOR_SIZE,
};

/// Policy for entries discovered without a registered parent directory
/// (a broken walk ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
  /// Log and skip the entry, keep walking.
  #[default]
  Skip,
  /// Abort the build.
  Fail,
}

/// A contiguous data extent: starting sector and byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
  pub sector: u32,
  pub len: u32,
}

/// Index of the first child record; positions 0 and 1 are the fixed
/// self and parent entries and are never sorted.
const FIRST_CHILD_RECORD: usize = 2;

/// One directory of the image. Owns its children; its own "real" record
/// lives in the parent's record list and is located there by identifier.
pub struct IsoDir {
  identifier: ArrayStringU255,
  /// Self, parent, then one record per file or subdirectory.
  records: Vec<DirectoryRecord>,
  children: Vec<IsoDir>,
}

impl IsoDir {
  fn new(identifier: ArrayStringU255, recorded: RecordingDate) -> Self {
    Self {
      identifier,
      records: vec![
        DirectoryRecord::current_directory(recorded),
        DirectoryRecord::parent_directory(recorded),
      ],
      children: Vec::new(),
    }
  }

  fn sort_records(&mut self) {
    self.records[FIRST_CHILD_RECORD..]
      .sort_by(|a, b| a.identifier.as_bytes().cmp(b.identifier.as_bytes()));
  }

  /// Serialized size of the record list under the no-straddle rule: a
  /// record that does not fit before the next sector edge is pushed past
  /// it, wasting the remainder of the sector.
  fn layout_size(&self) -> usize {
    let mut pos = 0usize;

    for record in &self.records {
      let len = record.len();
      let left = SECTOR_SIZE as usize - pos % SECTOR_SIZE as usize;

      if len > left {
        pos += left;
      }
      pos += len;
    }

    pos
  }

  fn serialize_records(&self) -> Vec<u8> {
    let mut buf = Vec::with_capacity(self.layout_size());

    for record in &self.records {
      let len = record.len();
      let left = SECTOR_SIZE as usize - buf.len() % SECTOR_SIZE as usize;

      if len > left {
        buf.resize(buf.len() + left, 0);
      }
      record.write(&mut buf).expect("in-memory serialization");
    }

    buf
  }
}

/// The whole tree plus the orphan policy applied while it is built.
pub struct DirTree {
  root: IsoDir,
  policy: OrphanPolicy,
}

/// Everything the volume descriptors need once layout is done.
pub struct FinalizedTree {
  /// Pre-order path table entries; index 1 is the root.
  pub path_table: Vec<PathTableEntry>,
  /// The root directory's finalized self record, embedded in the PVD.
  pub root_record: DirectoryRecord,
}

impl DirTree {
  pub fn new(policy: OrphanPolicy) -> Self {
    Self {
      // The root's identifier is the single 0x00 byte, in the record
      // list and the path table alike.
      root: IsoDir::new(
        ArrayStringU255::from_str_truncate("\u{0}"),
        RecordingDate::default(),
      ),
      policy,
    }
  }

  fn resolve_mut(&mut self, path: &IsoPath) -> Option<&mut IsoDir> {
    let mut dir = &mut self.root;

    for part in path.components() {
      let id = spec::directory_identifier(part);
      dir = dir.children.iter_mut().find(|c| c.identifier == id)?;
    }

    Some(dir)
  }

  /// Idempotently creates the chain of directories for `path`, appending
  /// a placeholder record to each new directory's parent. Extent fields
  /// stay zero until finalization.
  pub fn ensure_directory(&mut self, path: &IsoPath, mtime: chrono::DateTime<chrono::Utc>) {
    let recorded = RecordingDate::from(mtime);
    let mut dir = &mut self.root;

    for part in path.components() {
      let id = spec::directory_identifier(part);

      let ix = match dir.children.iter().position(|c| c.identifier == id) {
        Some(ix) => ix,
        None => {
          log::debug!("registering directory {:?}", part);
          dir
            .records
            .push(DirectoryRecord::new(id.clone(), FileFlags::DIRECTORY, recorded));
          dir.children.push(IsoDir::new(id, recorded));
          dir.children.len() - 1
        }
      };

      dir = &mut dir.children[ix];
    }
  }

  /// Allocates a file's data extent and appends its record to the parent
  /// directory.
  ///
  /// One leading sector is reserved for the ZIP local header; file data
  /// begins on the following sector boundary. Zero-length files still
  /// reserve the header sector and record `data_len = 0`.
  ///
  /// Returns `None` when the parent was never registered and the policy
  /// says skip.
  pub fn add_file(
    &mut self,
    path: &IsoPath,
    size: u32,
    mtime: chrono::DateTime<chrono::Utc>,
    allocator: &mut LbaAllocator,
  ) -> Result<Option<Extent>> {
    let policy = self.policy;

    let Some(parent) = self.resolve_mut(path.parent()) else {
      match policy {
        OrphanPolicy::Skip => {
          log::warn!(
            "skipping {:?}: parent directory was never registered",
            path.as_str()
          );
          return Ok(None);
        }
        OrphanPolicy::Fail => return Err(Error::OrphanedEntry(path.as_str().to_owned())),
      }
    };

    let sectors = 1 + size.div_ceil(SECTOR_SIZE);
    let first = allocator.allocate_sectors(sectors);
    let extent = Extent {
      sector: first + 1,
      len: size,
    };

    let mut record = DirectoryRecord::new(
      spec::file_identifier(path.file_name()),
      FileFlags::empty(),
      RecordingDate::from(mtime),
    );
    record.extent = LsbMsb32(extent.sector);
    record.data_len = LsbMsb32(size);
    parent.records.push(record);

    Ok(Some(extent))
  }

  /// Deferred directory layout: one recursive pass, parents strictly
  /// before children. Allocates every directory's extent, patches the
  /// placeholder records, assigns pre-order path table indices, and
  /// serializes each record list at its extent.
  pub fn finalize<W: Write + Seek>(
    &mut self,
    allocator: &mut LbaAllocator,
    out: &mut W,
  ) -> Result<FinalizedTree> {
    let mut path_table = Vec::new();
    let mut next_index = 0u16;

    finalize_dir(
      &mut self.root,
      None,
      1,
      &mut next_index,
      allocator,
      &mut path_table,
      out,
    )?;

    Ok(FinalizedTree {
      root_record: self.root.records[0].clone(),
      path_table,
    })
  }
}

fn finalize_dir<W: Write + Seek>(
  dir: &mut IsoDir,
  parent_extent: Option<Extent>,
  parent_index: u16,
  next_index: &mut u16,
  allocator: &mut LbaAllocator,
  path_table: &mut Vec<PathTableEntry>,
  out: &mut W,
) -> Result<Extent> {
  dir.sort_records();

  let size = dir.layout_size();
  if size > u32::MAX as usize {
    return Err(Error::Capacity("directory listing exceeds its 32-bit length field"));
  }

  let sector = allocator.allocate(size as u32);
  let extent = Extent {
    sector,
    len: size as u32,
  };
  // The root's parent is itself.
  let parent_extent = parent_extent.unwrap_or(extent);

  if *next_index == u16::MAX {
    return Err(Error::Capacity("path table index overflow"));
  }
  *next_index += 1;
  let index = *next_index;

  log::debug!(
    "directory {:?} at sector {} ({} bytes), path table index {}",
    dir.identifier.as_str(),
    sector,
    size,
    index
  );

  path_table.push(PathTableEntry {
    extent: sector,
    parent_number: parent_index,
    identifier: dir.identifier.clone(),
  });

  dir.records[0].extent = LsbMsb32(extent.sector);
  dir.records[0].data_len = LsbMsb32(extent.len);
  dir.records[1].extent = LsbMsb32(parent_extent.sector);
  dir.records[1].data_len = LsbMsb32(parent_extent.len);

  for child_ix in 0..dir.children.len() {
    let child_extent = finalize_dir(
      &mut dir.children[child_ix],
      Some(extent),
      index,
      next_index,
      allocator,
      path_table,
      out,
    )?;

    // Patch the child's placeholder in our own record list; the list was
    // sorted above, so it is located by identifier rather than position.
    let id = dir.children[child_ix].identifier.clone();
    let record = dir
      .records
      .iter_mut()
      .find(|r| r.is_directory() && r.identifier == id)
      .expect("every child has a placeholder record");
    record.extent = LsbMsb32(child_extent.sector);
    record.data_len = LsbMsb32(child_extent.len);
  }

  let bytes = dir.serialize_records();
  debug_assert_eq!(bytes.len(), size);

  out.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
  out.write_all(&bytes)?;

  Ok(extent)
}

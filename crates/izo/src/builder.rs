//! Image assembly: drives the allocator, the directory tree, the volume
//! descriptors and the archive trailer against one seekable output.

use byteorder::{BigEndian, LittleEndian};
use chrono::{DateTime, Utc};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::eltorito::{self, BootCatalog, BootRecordVolumeDescriptor};
use crate::error::{Error, Result};
use crate::lba::LbaAllocator;
use crate::path::IsoPath;
use crate::spec::{
  DecimalDateTime, LsbMsb32, PrimaryVolumeDescriptor, VolumeDescriptorSetTerminator,
  BOOT_CATALOG_SECTOR, BOOT_RECORD_SECTOR, PVD_SECTOR, SECTOR_SIZE,
};
use crate::tree::{DirTree, OrphanPolicy};
use crate::zip;

const MEGABYTE: u64 = 1 << 20;

/// How the final image length is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSize {
  /// Content plus trailer, rounded up to the next 1 MiB boundary.
  #[default]
  RoundToMegabyte,
  /// A fixed byte length, e.g. the capacity of a block device. The build
  /// fails when content and trailer do not fit.
  Fixed(u64),
}

/// Everything configurable about an image build.
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
  pub system_id: String,
  pub volume_id: String,
  pub volume_set_id: String,
  pub publisher_id: String,
  pub preparer_id: String,
  pub application_id: String,
  pub creation_date: DecimalDateTime,
  pub modification_date: DecimalDateTime,
  pub expiration_date: DecimalDateTime,
  pub effective_date: DecimalDateTime,
  /// Relative path, inside the source tree, of the boot image to register
  /// in the El Torito catalog and patch with a boot information table.
  pub boot: Option<String>,
  /// Appended verbatim after the End of Central Directory record, closing
  /// the image.
  pub comment: Vec<u8>,
  pub orphan_policy: OrphanPolicy,
  pub size: ImageSize,
}

/// Builds one image that parses both as an ISO 9660 volume and as a stored
/// ZIP archive.
///
/// Files are appended through [`add_file`](Self::add_file) (or wholesale
/// through [`capture`](Self::capture)); [`finish`](Self::finish) lays out
/// the directories and writes every deferred structure.
pub struct ImageBuilder<W> {
  out: W,
  options: ImageOptions,
  allocator: LbaAllocator,
  tree: DirTree,
  central: Vec<zip::FileHeader>,
  terminator_sector: u32,
  /// Normalized archive path of the requested boot image.
  boot_name: Option<String>,
  /// First data sector of the boot image, once it has been seen.
  boot_load_rba: Option<u32>,
}

/// Archive-side spelling of a path: stored case, `/` separators.
fn archive_name(path: &IsoPath) -> String {
  path.components().collect::<Vec<_>>().join("/")
}

impl<W: Write + Seek> ImageBuilder<W> {
  pub fn new(out: W, options: ImageOptions) -> Self {
    let mut allocator = LbaAllocator::new(SECTOR_SIZE, PVD_SECTOR);

    let pvd = allocator.allocate_sectors(1);
    debug_assert_eq!(pvd, PVD_SECTOR);

    if options.boot.is_some() {
      let record = allocator.allocate_sectors(1);
      let catalog = allocator.allocate_sectors(1);
      debug_assert_eq!(record, BOOT_RECORD_SECTOR);
      debug_assert_eq!(catalog, BOOT_CATALOG_SECTOR);
    }

    let terminator_sector = allocator.allocate_sectors(1);

    let boot_name = options
      .boot
      .as_deref()
      .map(|boot| archive_name(IsoPath::new(boot)));
    let tree = DirTree::new(options.orphan_policy);

    Self {
      out,
      options,
      allocator,
      tree,
      central: Vec::new(),
      terminator_sector,
      boot_name,
      boot_load_rba: None,
    }
  }

  /// Registers a directory. Parents are created as needed; registering an
  /// existing directory is a no-op.
  pub fn add_directory(&mut self, path: &IsoPath, mtime: DateTime<Utc>) {
    self.tree.ensure_directory(path, mtime);
  }

  /// Appends one file: allocates its extent, writes the ZIP local header
  /// into the slack of the preceding sector, then the data itself.
  ///
  /// When `path` names the configured boot image, the boot information
  /// table is patched into `data` first; the stored CRC-32 covers the
  /// patched bytes.
  pub fn add_file(&mut self, path: &IsoPath, mut data: Vec<u8>, mtime: DateTime<Utc>) -> Result<()> {
    if data.len() > u32::MAX as usize {
      return Err(Error::Capacity("file exceeds the 32-bit size fields"));
    }
    let size = data.len() as u32;

    let Some(extent) = self.tree.add_file(path, size, mtime, &mut self.allocator)? else {
      return Ok(());
    };

    let name = archive_name(path);

    if self.boot_name.as_deref() == Some(name.as_str()) {
      log::info!("boot image {:?} at sector {}", name, extent.sector);
      eltorito::patch_boot_info(&mut data, PVD_SECTOR, extent.sector);
      self.boot_load_rba = Some(extent.sector);
    }

    let header = zip::FileHeader {
      name,
      datetime: mtime.into(),
      crc32: crc32fast::hash(&data),
      size,
      local_header_ofs: 0,
    };

    // The local header lives in the slack directly before the data extent;
    // a path longer than a sector would spill into the preceding extent.
    if header.local_len() > SECTOR_SIZE as usize {
      return Err(Error::Capacity("archive path exceeds its header sector"));
    }

    let data_ofs = extent.sector as u64 * SECTOR_SIZE as u64;
    let header_ofs = data_ofs - header.local_len() as u64;
    if header_ofs > u32::MAX as u64 {
      return Err(Error::Capacity("image exceeds the 32-bit zip offsets"));
    }

    let header = zip::FileHeader {
      local_header_ofs: header_ofs as u32,
      ..header
    };

    log::debug!(
      "file {:?}: {} bytes at sector {}, local header at {}",
      header.name,
      size,
      extent.sector,
      header_ofs
    );

    self.out.seek(SeekFrom::Start(header_ofs))?;
    header.write_local(&mut self.out)?;
    self.out.write_all(&data)?;
    self.central.push(header);

    Ok(())
  }

  /// Walks `source` and appends everything under it, directories before
  /// their contents, sorted by file name for reproducible output.
  pub fn capture(&mut self, source: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source).sort_by_file_name() {
      let entry = entry?;

      if entry.depth() == 0 {
        continue;
      }

      let rel = entry
        .path()
        .strip_prefix(source)
        .expect("walked path is under the source root")
        .to_string_lossy()
        .into_owned();
      let path = IsoPath::new(&rel);

      let file_type = entry.file_type();
      let mtime = DateTime::<Utc>::from(entry.metadata()?.modified()?);

      if file_type.is_dir() {
        self.add_directory(path, mtime);
      } else if file_type.is_file() {
        let data = std::fs::read(entry.path())?;
        self.add_file(path, data, mtime)?;
      } else {
        log::warn!("skipping {}: not a regular file", entry.path().display());
      }
    }

    Ok(())
  }

  /// Finalizes the image: directory extents, path tables, volume
  /// descriptors, and the central directory trailer. Returns the output
  /// writer positioned at the end of the image.
  pub fn finish(mut self) -> Result<W> {
    if let Some(boot) = &self.options.boot {
      if self.boot_load_rba.is_none() {
        return Err(Error::BootImageMissing(boot.clone()));
      }
    }
    if self.central.len() > u16::MAX as usize {
      return Err(Error::Capacity("archive exceeds 65535 entries"));
    }
    if self.options.comment.len() > u16::MAX as usize {
      return Err(Error::Capacity("archive comment exceeds 65535 bytes"));
    }

    let finalized = self.tree.finalize(&mut self.allocator, &mut self.out)?;

    let mut table_le = Vec::new();
    let mut table_be = Vec::new();
    for entry in &finalized.path_table {
      entry
        .write::<LittleEndian, _>(&mut table_le)
        .expect("in-memory serialization");
      entry
        .write::<BigEndian, _>(&mut table_be)
        .expect("in-memory serialization");
    }
    debug_assert_eq!(table_le.len(), table_be.len());

    let table_size = table_le.len() as u32;
    let lsb_sector = self.allocator.allocate(table_size);
    self.out.seek(SeekFrom::Start(lsb_sector as u64 * SECTOR_SIZE as u64))?;
    self.out.write_all(&table_le)?;

    let msb_sector = self.allocator.allocate(table_size);
    self.out.seek(SeekFrom::Start(msb_sector as u64 * SECTOR_SIZE as u64))?;
    self.out.write_all(&table_be)?;

    let content_end = self.allocator.next_lba() as u64 * SECTOR_SIZE as u64;

    let cdir_len: u64 = self.central.iter().map(|h| h.central_len() as u64).sum();
    let trailer = cdir_len + zip::END_RECORD_LEN as u64 + self.options.comment.len() as u64;

    let image_size = match self.options.size {
      ImageSize::RoundToMegabyte => (content_end + trailer + MEGABYTE) & !(MEGABYTE - 1),
      ImageSize::Fixed(len) => {
        if content_end + trailer > len {
          return Err(Error::ImageTooSmall {
            need: content_end + trailer,
            have: len,
          });
        }
        len
      }
    };

    if image_size > u32::MAX as u64 {
      return Err(Error::Capacity("image exceeds the 32-bit zip offsets"));
    }

    let pvd = PrimaryVolumeDescriptor {
      system_id: self.options.system_id.clone(),
      volume_id: self.options.volume_id.clone(),
      num_sectors: LsbMsb32((image_size / SECTOR_SIZE as u64) as u32),
      path_table_size: LsbMsb32(table_size),
      lsb_path_table_sector: lsb_sector,
      msb_path_table_sector: msb_sector,
      root_directory_record: finalized.root_record,
      volume_set_id: self.options.volume_set_id.clone(),
      publisher_id: self.options.publisher_id.clone(),
      preparer_id: self.options.preparer_id.clone(),
      application_id: self.options.application_id.clone(),
      creation_date: self.options.creation_date,
      modification_date: self.options.modification_date,
      expiration_date: self.options.expiration_date,
      effective_date: self.options.effective_date,
    };

    self.out.seek(SeekFrom::Start(PVD_SECTOR as u64 * SECTOR_SIZE as u64))?;
    self.out.write_all(&pvd.serialize())?;

    if let Some(load_rba) = self.boot_load_rba {
      let record = BootRecordVolumeDescriptor {
        catalog_sector: BOOT_CATALOG_SECTOR,
      };
      self
        .out
        .seek(SeekFrom::Start(BOOT_RECORD_SECTOR as u64 * SECTOR_SIZE as u64))?;
      self.out.write_all(&record.serialize())?;

      let catalog = BootCatalog { load_rba };
      self
        .out
        .seek(SeekFrom::Start(BOOT_CATALOG_SECTOR as u64 * SECTOR_SIZE as u64))?;
      self.out.write_all(&catalog.serialize())?;
    }

    self
      .out
      .seek(SeekFrom::Start(self.terminator_sector as u64 * SECTOR_SIZE as u64))?;
    self.out.write_all(&VolumeDescriptorSetTerminator.serialize())?;

    let central_dir_start = image_size - trailer;

    self.out.seek(SeekFrom::Start(central_dir_start))?;
    for header in &self.central {
      header.write_central(&mut self.out)?;
    }

    let end = zip::EndOfCentralDir {
      num_records: self.central.len() as u16,
      central_dir_bytes: cdir_len as u32,
      central_dir_start: central_dir_start as u32,
      comment_len: self.options.comment.len() as u16,
    };
    end.write(&mut self.out)?;
    self.out.write_all(&self.options.comment)?;

    log::info!(
      "image complete: {} files, {} content sectors, {} bytes total",
      self.central.len(),
      self.allocator.next_lba(),
      image_size
    );

    Ok(self.out)
  }
}

//! ISO 9660 on-disk structures and their serialization.
//!
//! Only the subset needed to author a single-volume image is modeled:
//! directory records, path table records and the Primary Volume Descriptor.
//! Integers that the format stores in both byte orders are wrapped in
//! [`LsbMsb16`]/[`LsbMsb32`] so call sites set a value once.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Write;

use crate::error::{Error, Result};

pub const SECTOR_SIZE: u32 = 2048;

/// Sector of the Primary Volume Descriptor. Sectors 0..16 are the system
/// area and are never written.
pub const PVD_SECTOR: u32 = 16;
/// Sector of the El Torito Boot Record when boot support is requested.
pub const BOOT_RECORD_SECTOR: u32 = 17;
/// Sector of the El Torito Boot Catalog when boot support is requested.
pub const BOOT_CATALOG_SECTOR: u32 = 18;

pub const VDTYPE_BOOT: u8 = 0;
pub const VDTYPE_PRIMARY: u8 = 1;
pub const VDTYPE_END: u8 = 255;

pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";

pub type ArrayStringU255 = arraystring::ArrayString<arraystring::typenum::U255>;

/// Identifiers longer than this are truncated so the enclosing directory
/// record length always fits its 8-bit length field.
const MAX_IDENTIFIER_LEN: usize = 200;

/// Both-endian 16-bit field; serialized little-endian first, then
/// big-endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LsbMsb16(pub u16);

impl LsbMsb16 {
  pub fn get(self) -> u16 {
    self.0
  }

  pub fn write<W: Write>(self, out: &mut W) -> std::io::Result<()> {
    out.write_u16::<LittleEndian>(self.0)?;
    out.write_u16::<BigEndian>(self.0)
  }
}

/// Both-endian 32-bit field; serialized little-endian first, then
/// big-endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LsbMsb32(pub u32);

impl LsbMsb32 {
  pub fn get(self) -> u32 {
    self.0
  }

  pub fn write<W: Write>(self, out: &mut W) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(self.0)?;
    out.write_u32::<BigEndian>(self.0)
  }
}

bitflags::bitflags! {
  #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
  pub struct FileFlags: u8 {
    const HIDDEN = 1 << 0;
    const DIRECTORY = 1 << 1;
    const ASSOCIATED = 1 << 2;
    const RECORD = 1 << 3;
    const PROTECTION = 1 << 4;
    const MULTI_EXTENT = 1 << 7;
  }
}

/// 7-byte numeric recording date carried by every directory record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingDate {
  pub years_since_1900: u8,
  pub month: u8,
  pub day: u8,
  pub hour: u8,
  pub minute: u8,
  pub second: u8,
  pub gmt_offset: i8,
}

impl From<chrono::DateTime<chrono::Utc>> for RecordingDate {
  fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
    use chrono::{Datelike, Timelike};

    Self {
      years_since_1900: (dt.year().clamp(1900, 2155) - 1900) as u8,
      month: dt.month() as u8,
      day: dt.day() as u8,
      hour: dt.hour() as u8,
      minute: dt.minute() as u8,
      second: dt.second() as u8,
      gmt_offset: 0,
    }
  }
}

impl RecordingDate {
  pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    out.write_u8(self.years_since_1900)?;
    out.write_u8(self.month)?;
    out.write_u8(self.day)?;
    out.write_u8(self.hour)?;
    out.write_u8(self.minute)?;
    out.write_u8(self.second)?;
    out.write_i8(self.gmt_offset)
  }
}

/// 17-byte ASCII volume date: sixteen decimal digit positions
/// (`YYYYMMDDHHMMSSCC`) followed by a signed GMT offset in quarter-hour
/// units.
///
/// Configuration strings are digit prefixes of that layout, optionally
/// followed by a `+HHMM`/`-HHMM` offset; unspecified trailing digit
/// positions fill with `'0'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalDateTime {
  digits: [u8; 16],
  gmt_offset: i8,
}

impl Default for DecimalDateTime {
  fn default() -> Self {
    Self {
      digits: [b'0'; 16],
      gmt_offset: 0,
    }
  }
}

impl DecimalDateTime {
  /// Parses a date like `"2078123123595999+0800"` or any truncation of its
  /// digit prefix.
  pub fn parse(s: &str) -> Result<Self> {
    let (digit_part, offset_part) = match s.find(['+', '-']) {
      Some(pos) => s.split_at(pos),
      None => (s, ""),
    };

    if digit_part.len() > 16 || !digit_part.bytes().all(|b| b.is_ascii_digit()) {
      return Err(Error::InvalidDate(s.to_owned()));
    }

    let mut digits = [b'0'; 16];
    digits[..digit_part.len()].copy_from_slice(digit_part.as_bytes());

    let gmt_offset = if offset_part.is_empty() {
      0
    } else {
      if offset_part.len() != 5 || !offset_part[1..].bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidDate(s.to_owned()));
      }

      let sign: i32 = if offset_part.starts_with('-') { -1 } else { 1 };
      let hours: i32 = offset_part[1..3].parse().map_err(|_| Error::InvalidDate(s.to_owned()))?;
      let minutes: i32 = offset_part[3..5].parse().map_err(|_| Error::InvalidDate(s.to_owned()))?;

      // The descriptor field spans -48 (west) to +52 (east) quarter hours.
      let quarters = sign * (hours * 60 + minutes) / 15;
      if !(-48..=52).contains(&quarters) {
        return Err(Error::InvalidDate(s.to_owned()));
      }
      quarters as i8
    };

    Ok(Self { digits, gmt_offset })
  }

  pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    out.write_all(&self.digits)?;
    out.write_i8(self.gmt_offset)
  }
}

/// Uppercased ISO file identifier with the mandatory `";1"` version suffix.
pub fn file_identifier(name: &str) -> ArrayStringU255 {
  let mut id = name.to_ascii_uppercase();
  id.truncate(MAX_IDENTIFIER_LEN - 2);
  id.push_str(";1");
  ArrayStringU255::from_str_truncate(&id)
}

/// Uppercased ISO directory identifier; directories carry no version
/// suffix.
pub fn directory_identifier(name: &str) -> ArrayStringU255 {
  let mut id = name.to_ascii_uppercase();
  id.truncate(MAX_IDENTIFIER_LEN);
  ArrayStringU255::from_str_truncate(&id)
}

/// A single directory record. Variable length: 33 fixed bytes, the
/// identifier, and a pad byte whenever the identifier length is even (so
/// the record length stays even).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
  pub extent: LsbMsb32,
  pub data_len: LsbMsb32,
  pub recorded: RecordingDate,
  pub flags: FileFlags,
  pub volume_seq: LsbMsb16,
  pub identifier: ArrayStringU255,
}

impl DirectoryRecord {
  pub const BASE_LEN: usize = 33;

  pub fn new(identifier: ArrayStringU255, flags: FileFlags, recorded: RecordingDate) -> Self {
    Self {
      extent: LsbMsb32(0),
      data_len: LsbMsb32(0),
      recorded,
      flags,
      volume_seq: LsbMsb16(1),
      identifier,
    }
  }

  /// The `.` entry; identifier is the single byte 0x00.
  pub fn current_directory(recorded: RecordingDate) -> Self {
    Self::new(
      ArrayStringU255::from_str_truncate("\u{0}"),
      FileFlags::DIRECTORY,
      recorded,
    )
  }

  /// The `..` entry; identifier is the single byte 0x01.
  pub fn parent_directory(recorded: RecordingDate) -> Self {
    Self::new(
      ArrayStringU255::from_str_truncate("\u{1}"),
      FileFlags::DIRECTORY,
      recorded,
    )
  }

  pub fn is_directory(&self) -> bool {
    self.flags.contains(FileFlags::DIRECTORY)
  }

  /// Serialized record length, pad byte included.
  pub fn len(&self) -> usize {
    let id_len = self.identifier.len() as usize;
    Self::BASE_LEN + id_len + (id_len % 2 == 0) as usize
  }

  pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    let id = self.identifier.as_bytes();

    out.write_u8(self.len() as u8)?;
    out.write_u8(0)?; // extended attribute record length
    self.extent.write(out)?;
    self.data_len.write(out)?;
    self.recorded.write(out)?;
    out.write_u8(self.flags.bits())?;
    out.write_u8(0)?; // file unit size
    out.write_u8(0)?; // interleave gap size
    self.volume_seq.write(out)?;
    out.write_u8(id.len() as u8)?;
    out.write_all(id)?;

    if id.len() % 2 == 0 {
      out.write_u8(0)?;
    }

    Ok(())
  }
}

/// One path table record. The table exists twice in the image, once per
/// byte order, so serialization is generic over [`ByteOrder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTableEntry {
  pub extent: u32,
  /// 1-based index of the parent directory's own entry; the root points at
  /// itself.
  pub parent_number: u16,
  pub identifier: ArrayStringU255,
}

impl PathTableEntry {
  /// Serialized entry length; identifiers of odd length gain a pad byte.
  pub fn len(&self) -> usize {
    let id_len = self.identifier.len() as usize;
    8 + id_len + id_len % 2
  }

  pub fn write<E: ByteOrder, W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    let id = self.identifier.as_bytes();

    out.write_u8(id.len() as u8)?;
    out.write_u8(0)?; // extended attribute record length
    out.write_u32::<E>(self.extent)?;
    out.write_u16::<E>(self.parent_number)?;
    out.write_all(id)?;

    if id.len() % 2 == 1 {
      out.write_u8(0)?;
    }

    Ok(())
  }
}

/// Space-pads (or truncates) `s` to exactly `width` bytes.
fn write_padded<W: Write>(out: &mut W, s: &str, width: usize) -> std::io::Result<()> {
  let bytes = s.as_bytes();
  let take = bytes.len().min(width);

  out.write_all(&bytes[..take])?;

  for _ in take..width {
    out.write_u8(b' ')?;
  }

  Ok(())
}

/// Primary Volume Descriptor, finalized only once every extent is known.
#[derive(Debug, Clone)]
pub struct PrimaryVolumeDescriptor {
  pub system_id: String,
  pub volume_id: String,
  pub num_sectors: LsbMsb32,
  pub path_table_size: LsbMsb32,
  pub lsb_path_table_sector: u32,
  pub msb_path_table_sector: u32,
  pub root_directory_record: DirectoryRecord,
  pub volume_set_id: String,
  pub publisher_id: String,
  pub preparer_id: String,
  pub application_id: String,
  pub creation_date: DecimalDateTime,
  pub modification_date: DecimalDateTime,
  pub expiration_date: DecimalDateTime,
  pub effective_date: DecimalDateTime,
}

impl PrimaryVolumeDescriptor {
  /// Serializes to a full descriptor sector.
  pub fn serialize(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(SECTOR_SIZE as usize);

    // Infallible: Vec<u8> never errors, and every field has fixed width.
    self.write(&mut out).expect("in-memory serialization");

    debug_assert_eq!(out.len(), SECTOR_SIZE as usize);
    out
  }

  fn write(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
    out.write_u8(VDTYPE_PRIMARY)?;
    out.write_all(STANDARD_IDENTIFIER)?;
    out.write_u8(1)?; // descriptor version
    out.write_u8(0)?;
    write_padded(out, &self.system_id, 32)?;
    write_padded(out, &self.volume_id, 32)?;
    out.write_all(&[0; 8])?;
    self.num_sectors.write(out)?;
    out.write_all(&[0; 32])?; // escape sequences
    LsbMsb16(1).write(out)?; // volume set size
    LsbMsb16(1).write(out)?; // volume sequence number
    LsbMsb16(SECTOR_SIZE as u16).write(out)?; // logical block size
    self.path_table_size.write(out)?;
    out.write_u32::<LittleEndian>(self.lsb_path_table_sector)?;
    out.write_u32::<LittleEndian>(0)?; // optional type L table, unused
    out.write_u32::<BigEndian>(self.msb_path_table_sector)?;
    out.write_u32::<BigEndian>(0)?; // optional type M table, unused

    // Root directory record occupies a fixed 34-byte slot.
    debug_assert_eq!(self.root_directory_record.len(), 34);
    self.root_directory_record.write(out)?;

    write_padded(out, &self.volume_set_id, 128)?;
    write_padded(out, &self.publisher_id, 128)?;
    write_padded(out, &self.preparer_id, 128)?;
    write_padded(out, &self.application_id, 128)?;
    write_padded(out, "", 37)?; // copyright file identifier
    write_padded(out, "", 37)?; // abstract file identifier
    write_padded(out, "", 37)?; // bibliographical file identifier
    self.creation_date.write(out)?;
    self.modification_date.write(out)?;
    self.expiration_date.write(out)?;
    self.effective_date.write(out)?;
    out.write_u8(1)?; // file structure version
    out.resize(SECTOR_SIZE as usize, 0);

    Ok(())
  }
}

/// Volume Descriptor Set Terminator; closes the descriptor sequence.
pub struct VolumeDescriptorSetTerminator;

impl VolumeDescriptorSetTerminator {
  pub fn serialize(&self) -> Vec<u8> {
    let mut out = vec![0u8; SECTOR_SIZE as usize];
    out[0] = VDTYPE_END;
    out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
    out[6] = 1;
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lsbmsb_serializes_both_byte_orders() {
    let mut buf = vec![];
    LsbMsb32(0x11223344).write(&mut buf).unwrap();
    assert_eq!(buf, [0x44, 0x33, 0x22, 0x11, 0x11, 0x22, 0x33, 0x44]);

    buf.clear();
    LsbMsb16(0xABCD).write(&mut buf).unwrap();
    assert_eq!(buf, [0xCD, 0xAB, 0xAB, 0xCD]);
  }

  #[test]
  fn record_length_is_always_even() {
    let recorded = RecordingDate::default();

    let odd_id = DirectoryRecord::new(file_identifier("a.txt"), FileFlags::empty(), recorded);
    assert_eq!(odd_id.identifier.len(), 7); // "A.TXT;1"
    assert_eq!(odd_id.len(), 40);

    let even_id = DirectoryRecord::new(file_identifier("ab.txt"), FileFlags::empty(), recorded);
    assert_eq!(even_id.identifier.len(), 8); // "AB.TXT;1"
    assert_eq!(even_id.len(), 42); // pad byte appended

    let mut buf = vec![];
    even_id.write(&mut buf).unwrap();
    assert_eq!(buf.len(), even_id.len());
    assert_eq!(buf[0] as usize, even_id.len());
  }

  #[test]
  fn self_record_is_thirty_four_bytes() {
    let record = DirectoryRecord::current_directory(RecordingDate::default());
    assert_eq!(record.len(), 34);

    let mut buf = vec![];
    record.write(&mut buf).unwrap();
    assert_eq!(buf.len(), 34);
    assert_eq!(buf[32], 1); // identifier length
    assert_eq!(buf[33], 0); // identifier byte
  }

  #[test]
  fn decimal_date_pads_truncated_strings_with_zeros() {
    let date = DecimalDateTime::parse("2078").unwrap();
    let mut buf = vec![];
    date.write(&mut buf).unwrap();
    assert_eq!(&buf[..16], b"2078000000000000");
    assert_eq!(buf[16], 0);
  }

  #[test]
  fn decimal_date_converts_offset_to_quarter_hours() {
    let date = DecimalDateTime::parse("2078123123595999+0800").unwrap();
    let mut buf = vec![];
    date.write(&mut buf).unwrap();
    assert_eq!(&buf[..16], b"2078123123595999");
    assert_eq!(buf[16] as i8, 32);

    let west = DecimalDateTime::parse("2024-0330").unwrap();
    let mut buf = vec![];
    west.write(&mut buf).unwrap();
    assert_eq!(buf[16] as i8, -14);
  }

  #[test]
  fn decimal_date_rejects_garbage() {
    assert!(DecimalDateTime::parse("not a date").is_err());
    assert!(DecimalDateTime::parse("2024+08").is_err());
  }

  #[test]
  fn decimal_date_rejects_offsets_outside_the_field_range() {
    assert!(DecimalDateTime::parse("2024+9959").is_err());
    assert!(DecimalDateTime::parse("2024+1315").is_err());
    assert!(DecimalDateTime::parse("2024-1215").is_err());

    // The boundaries themselves are valid.
    let east = DecimalDateTime::parse("2024+1300").unwrap();
    let mut buf = vec![];
    east.write(&mut buf).unwrap();
    assert_eq!(buf[16] as i8, 52);

    let west = DecimalDateTime::parse("2024-1200").unwrap();
    let mut buf = vec![];
    west.write(&mut buf).unwrap();
    assert_eq!(buf[16] as i8, -48);
  }

  #[test]
  fn path_table_entry_pads_odd_identifiers() {
    let entry = PathTableEntry {
      extent: 0x1234,
      parent_number: 1,
      identifier: directory_identifier("sub"),
    };

    assert_eq!(entry.len(), 12);

    let mut le = vec![];
    entry.write::<LittleEndian, _>(&mut le).unwrap();
    assert_eq!(le.len(), 12);
    assert_eq!(le[0], 3);
    assert_eq!(&le[2..6], &[0x34, 0x12, 0, 0]);
    assert_eq!(&le[8..11], b"SUB");
    assert_eq!(le[11], 0);

    let mut be = vec![];
    entry.write::<BigEndian, _>(&mut be).unwrap();
    assert_eq!(&be[2..6], &[0, 0, 0x12, 0x34]);
  }

  #[test]
  fn pvd_serializes_to_one_sector() {
    let pvd = PrimaryVolumeDescriptor {
      system_id: "LINUX".into(),
      volume_id: "IZO".into(),
      num_sectors: LsbMsb32(100),
      path_table_size: LsbMsb32(10),
      lsb_path_table_sector: 40,
      msb_path_table_sector: 41,
      root_directory_record: DirectoryRecord::current_directory(RecordingDate::default()),
      volume_set_id: String::new(),
      publisher_id: String::new(),
      preparer_id: String::new(),
      application_id: String::new(),
      creation_date: DecimalDateTime::default(),
      modification_date: DecimalDateTime::default(),
      expiration_date: DecimalDateTime::default(),
      effective_date: DecimalDateTime::default(),
    };

    let bytes = pvd.serialize();
    assert_eq!(bytes.len(), 2048);
    assert_eq!(bytes[0], VDTYPE_PRIMARY);
    assert_eq!(&bytes[1..6], b"CD001");
    assert_eq!(&bytes[80..84], &100u32.to_le_bytes());
    assert_eq!(&bytes[84..88], &100u32.to_be_bytes());
    assert_eq!(&bytes[140..144], &40u32.to_le_bytes());
    assert_eq!(&bytes[148..152], &41u32.to_be_bytes());
    assert_eq!(bytes[156], 34); // root record length
    assert_eq!(bytes[881], 1); // file structure version
  }
}

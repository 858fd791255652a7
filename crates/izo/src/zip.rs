//! ZIP on-disk records for the archive view of the image.
//!
//! Every entry is stored uncompressed. The local header for a file is
//! written into the slack of the sector preceding its data extent, so the
//! same bytes serve both the ISO and the ZIP interpretation.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

pub const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
pub const END_RECORD_SIGNATURE: u32 = 0x06054b50;

pub const LOCAL_HEADER_LEN: usize = 30;
pub const CENTRAL_HEADER_LEN: usize = 46;
pub const END_RECORD_LEN: usize = 22;

/// Minimum extraction version; 1.0 suffices for stored entries.
const VERSION_NEEDED: u16 = 10;
const METHOD_STORED: u16 = 0;

/// Legacy MS-DOS packed date and time, 16 bits each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DosDateTime {
  pub time: u16,
  pub date: u16,
}

impl From<chrono::DateTime<chrono::Utc>> for DosDateTime {
  fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
    use chrono::{Datelike, Timelike};

    // The DOS epoch is 1980; earlier timestamps clamp to it.
    let year = dt.year().clamp(1980, 2107) as u16;

    Self {
      time: (dt.hour() as u16) << 11 | (dt.minute() as u16) << 5 | (dt.second() as u16) / 2,
      date: (year - 1980) << 9 | (dt.month() as u16) << 5 | dt.day() as u16,
    }
  }
}

/// Per-file header data shared by the local header and its central
/// directory twin; the two views must agree field for field.
#[derive(Debug, Clone)]
pub struct FileHeader {
  /// Full relative path inside the archive, stored case, `/` separators.
  pub name: String,
  pub datetime: DosDateTime,
  pub crc32: u32,
  /// Uncompressed and compressed size alike; entries are stored.
  pub size: u32,
  /// Absolute image offset of the local header.
  pub local_header_ofs: u32,
}

impl FileHeader {
  pub fn local_len(&self) -> usize {
    LOCAL_HEADER_LEN + self.name.len()
  }

  pub fn central_len(&self) -> usize {
    CENTRAL_HEADER_LEN + self.name.len()
  }

  pub fn write_local<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(LOCAL_HEADER_SIGNATURE)?;
    out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    out.write_u16::<LittleEndian>(0)?; // general purpose bit flags
    out.write_u16::<LittleEndian>(METHOD_STORED)?;
    out.write_u16::<LittleEndian>(self.datetime.time)?;
    out.write_u16::<LittleEndian>(self.datetime.date)?;
    out.write_u32::<LittleEndian>(self.crc32)?;
    out.write_u32::<LittleEndian>(self.size)?; // compressed
    out.write_u32::<LittleEndian>(self.size)?; // uncompressed
    out.write_u16::<LittleEndian>(self.name.len() as u16)?;
    out.write_u16::<LittleEndian>(0)?; // extra field length
    out.write_all(self.name.as_bytes())
  }

  pub fn write_central<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(CENTRAL_HEADER_SIGNATURE)?;
    out.write_u16::<LittleEndian>(VERSION_NEEDED)?; // version made by
    out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    out.write_u16::<LittleEndian>(0)?; // general purpose bit flags
    out.write_u16::<LittleEndian>(METHOD_STORED)?;
    out.write_u16::<LittleEndian>(self.datetime.time)?;
    out.write_u16::<LittleEndian>(self.datetime.date)?;
    out.write_u32::<LittleEndian>(self.crc32)?;
    out.write_u32::<LittleEndian>(self.size)?; // compressed
    out.write_u32::<LittleEndian>(self.size)?; // uncompressed
    out.write_u16::<LittleEndian>(self.name.len() as u16)?;
    out.write_u16::<LittleEndian>(0)?; // extra field length
    out.write_u16::<LittleEndian>(0)?; // comment length
    out.write_u16::<LittleEndian>(0)?; // disk number start
    out.write_u16::<LittleEndian>(0)?; // internal attributes
    out.write_u32::<LittleEndian>(0)?; // external attributes
    out.write_u32::<LittleEndian>(self.local_header_ofs)?;
    out.write_all(self.name.as_bytes())
  }
}

/// End of Central Directory record; the comment bytes follow it and close
/// the image.
#[derive(Debug, Clone, Copy)]
pub struct EndOfCentralDir {
  pub num_records: u16,
  pub central_dir_bytes: u32,
  pub central_dir_start: u32,
  pub comment_len: u16,
}

impl EndOfCentralDir {
  pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(END_RECORD_SIGNATURE)?;
    out.write_u16::<LittleEndian>(0)?; // disk number
    out.write_u16::<LittleEndian>(0)?; // central directory start disk
    out.write_u16::<LittleEndian>(self.num_records)?; // records on this disk
    out.write_u16::<LittleEndian>(self.num_records)?;
    out.write_u32::<LittleEndian>(self.central_dir_bytes)?;
    out.write_u32::<LittleEndian>(self.central_dir_start)?;
    out.write_u16::<LittleEndian>(self.comment_len)
  }
}

/// Startup self-check of the CRC-32 primitive and the fixed record sizes.
/// A failure indicates a build or environment defect, never user data;
/// callers treat it as fatal.
pub fn self_test() {
  assert_eq!(crc32fast::hash(b"123456789"), 0xcbf43926);

  let header = FileHeader {
    name: String::new(),
    datetime: DosDateTime::default(),
    crc32: 0,
    size: 0,
    local_header_ofs: 0,
  };

  let mut buf = vec![];
  header.write_local(&mut buf).expect("in-memory serialization");
  assert_eq!(buf.len(), LOCAL_HEADER_LEN);

  buf.clear();
  header.write_central(&mut buf).expect("in-memory serialization");
  assert_eq!(buf.len(), CENTRAL_HEADER_LEN);

  buf.clear();
  let end = EndOfCentralDir {
    num_records: 0,
    central_dir_bytes: 0,
    central_dir_start: 0,
    comment_len: 0,
  };
  end.write(&mut buf).expect("in-memory serialization");
  assert_eq!(buf.len(), END_RECORD_LEN);
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn record_sizes_match_the_format() {
    self_test();
  }

  #[test]
  fn dos_datetime_packs_fields() {
    let dt = chrono::Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 31).unwrap();
    let dos = DosDateTime::from(dt);

    assert_eq!(dos.date >> 9, 44); // 2024 - 1980
    assert_eq!(dos.date >> 5 & 0xf, 3);
    assert_eq!(dos.date & 0x1f, 15);
    assert_eq!(dos.time >> 11, 13);
    assert_eq!(dos.time >> 5 & 0x3f, 45);
    assert_eq!((dos.time & 0x1f) * 2, 30); // two-second resolution
  }

  #[test]
  fn dos_datetime_clamps_to_the_epoch() {
    let dt = chrono::Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
    let dos = DosDateTime::from(dt);
    assert_eq!(dos.date >> 9, 0);
  }

  #[test]
  fn local_and_central_views_agree() {
    let header = FileHeader {
      name: "sub/b.txt".into(),
      datetime: DosDateTime { time: 0x6DAF, date: 0x586F },
      crc32: 0xDEADBEEF,
      size: 3000,
      local_header_ofs: 40 * 2048 - 39,
    };

    let mut local = vec![];
    header.write_local(&mut local).unwrap();
    assert_eq!(local.len(), header.local_len());
    assert_eq!(&local[0..4], &LOCAL_HEADER_SIGNATURE.to_le_bytes());

    let mut central = vec![];
    header.write_central(&mut central).unwrap();
    assert_eq!(central.len(), header.central_len());

    // crc32 / comp_size / uncomp_size occupy 14.. in the local header and
    // 16.. in the central header; the twelve bytes must be identical.
    assert_eq!(&local[14..26], &central[16..28]);
    assert_eq!(&central[42..46], &header.local_header_ofs.to_le_bytes());
    assert_eq!(&central[46..], b"sub/b.txt");
  }
}

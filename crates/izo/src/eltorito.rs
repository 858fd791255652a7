//! El Torito boot support: the Boot Record volume descriptor, the boot
//! catalog, and the boot information table patched into the boot image.

use crate::spec::{SECTOR_SIZE, STANDARD_IDENTIFIER, VDTYPE_BOOT};

pub const BOOT_SYSTEM_ID: &[u8] = b"EL TORITO SPECIFICATION";

/// x86 real-mode load segment for no-emulation boot.
pub const LOAD_SEGMENT: u16 = 0x07c0;
/// Virtual sectors the BIOS loads initially.
pub const LOAD_SECTOR_COUNT: u16 = 4;

const PLATFORM_X86: u8 = 0x00;
const HEADER_ID_VALIDATION: u8 = 0x01;
const BOOT_INDICATOR_BOOTABLE: u8 = 0x88;
const MEDIA_NO_EMULATION: u8 = 0x00;
const HEADER_INDICATOR_FINAL: u8 = 0x91;

/// Boot Record volume descriptor; lives at a fixed sector and points at
/// the boot catalog.
#[derive(Debug, Clone, Copy)]
pub struct BootRecordVolumeDescriptor {
  pub catalog_sector: u32,
}

impl BootRecordVolumeDescriptor {
  pub fn serialize(&self) -> Vec<u8> {
    let mut out = vec![0u8; SECTOR_SIZE as usize];

    out[0] = VDTYPE_BOOT;
    out[1..6].copy_from_slice(STANDARD_IDENTIFIER);
    out[6] = 1; // descriptor version
    out[7..7 + BOOT_SYSTEM_ID.len()].copy_from_slice(BOOT_SYSTEM_ID);
    out[71..75].copy_from_slice(&self.catalog_sector.to_le_bytes());

    out
  }
}

/// Boot catalog: validation entry, the default/initial entry, and a final
/// section header with no following sections.
#[derive(Debug, Clone, Copy)]
pub struct BootCatalog {
  /// First data sector of the boot image.
  pub load_rba: u32,
}

impl BootCatalog {
  pub fn serialize(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(SECTOR_SIZE as usize);

    out.extend_from_slice(&validation_entry());
    self.write_initial_entry(&mut out);
    write_section_terminator(&mut out);
    out.resize(SECTOR_SIZE as usize, 0);

    out
  }

  fn write_initial_entry(&self, out: &mut Vec<u8>) {
    out.push(BOOT_INDICATOR_BOOTABLE);
    out.push(MEDIA_NO_EMULATION);
    out.extend_from_slice(&LOAD_SEGMENT.to_le_bytes());
    out.push(0); // system type
    out.push(0);
    out.extend_from_slice(&LOAD_SECTOR_COUNT.to_le_bytes());
    out.extend_from_slice(&self.load_rba.to_le_bytes());
    out.extend_from_slice(&[0; 20]);
  }
}

/// Builds the 32-byte validation entry; the checksum word is chosen so all
/// sixteen little-endian words of the entry sum to zero.
fn validation_entry() -> [u8; 32] {
  let mut entry = [0u8; 32];
  entry[0] = HEADER_ID_VALIDATION;
  entry[1] = PLATFORM_X86;
  entry[30] = 0x55;
  entry[31] = 0xaa;

  let mut sum: u16 = 0;
  for word in entry.chunks_exact(2) {
    sum = sum.wrapping_add(u16::from_le_bytes([word[0], word[1]]));
  }

  let checksum = 0u16.wrapping_sub(sum);
  entry[28..30].copy_from_slice(&checksum.to_le_bytes());

  entry
}

fn write_section_terminator(out: &mut Vec<u8>) {
  out.push(HEADER_INDICATOR_FINAL);
  out.push(PLATFORM_X86);
  out.extend_from_slice(&[0, 0]); // no section entries follow
  out.extend_from_slice(&[0; 28]);
}

/// Offset of the boot information table inside the boot image.
pub const BOOT_INFO_TABLE_OFFSET: usize = 8;
/// Size of the patched region.
pub const BOOT_INFO_TABLE_LEN: usize = 40;
/// The bootstrap stub; never checksummed or altered.
pub const BOOT_STUB_LEN: usize = 64;

/// Patches the boot information table into the staged boot image bytes.
///
/// The table carries the PVD sector, the image's own data sector, its byte
/// length and an additive 32-bit checksum of everything past the 64-byte
/// bootstrap stub. Must run before the buffer is written or CRC'd.
pub fn patch_boot_info(buf: &mut [u8], pvd_sector: u32, data_sector: u32) {
  if buf.len() < BOOT_STUB_LEN {
    log::warn!(
      "boot image is only {} bytes, too short for a boot information table",
      buf.len()
    );
    return;
  }

  let checksum = boot_checksum(&buf[BOOT_STUB_LEN..]);
  let image_len = buf.len() as u32;

  let table = &mut buf[BOOT_INFO_TABLE_OFFSET..BOOT_INFO_TABLE_OFFSET + BOOT_INFO_TABLE_LEN];
  table.fill(0);
  table[0..4].copy_from_slice(&pvd_sector.to_le_bytes());
  table[4..8].copy_from_slice(&data_sector.to_le_bytes());
  table[8..12].copy_from_slice(&image_len.to_le_bytes());
  table[12..16].copy_from_slice(&checksum.to_le_bytes());
}

/// Additive 32-bit checksum over little-endian words; a trailing partial
/// word is zero-extended.
pub fn boot_checksum(bytes: &[u8]) -> u32 {
  let mut sum: u32 = 0;
  let mut words = bytes.chunks_exact(4);

  for word in &mut words {
    sum = sum.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
  }

  let rem = words.remainder();
  if !rem.is_empty() {
    let mut word = [0u8; 4];
    word[..rem.len()].copy_from_slice(rem);
    sum = sum.wrapping_add(u32::from_le_bytes(word));
  }

  sum
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validation_entry_words_sum_to_zero() {
    let entry = validation_entry();

    assert_eq!(entry[0], 0x01);
    assert_eq!(&entry[30..32], &[0x55, 0xaa]);

    let sum = entry
      .chunks_exact(2)
      .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
    assert_eq!(sum, 0);
  }

  #[test]
  fn catalog_layout() {
    let catalog = BootCatalog { load_rba: 21 };
    let bytes = catalog.serialize();

    assert_eq!(bytes.len(), 2048);
    assert_eq!(bytes[32], BOOT_INDICATOR_BOOTABLE);
    assert_eq!(bytes[33], MEDIA_NO_EMULATION);
    assert_eq!(&bytes[34..36], &LOAD_SEGMENT.to_le_bytes());
    assert_eq!(&bytes[38..40], &LOAD_SECTOR_COUNT.to_le_bytes());
    assert_eq!(&bytes[40..44], &21u32.to_le_bytes());
    assert_eq!(bytes[64], HEADER_INDICATOR_FINAL);
    assert_eq!(&bytes[66..68], &[0, 0]);
  }

  #[test]
  fn boot_record_points_at_the_catalog() {
    let record = BootRecordVolumeDescriptor { catalog_sector: 18 };
    let bytes = record.serialize();

    assert_eq!(bytes.len(), 2048);
    assert_eq!(bytes[0], VDTYPE_BOOT);
    assert_eq!(&bytes[1..6], b"CD001");
    assert_eq!(&bytes[7..30], BOOT_SYSTEM_ID);
    assert_eq!(&bytes[71..75], &18u32.to_le_bytes());
  }

  #[test]
  fn checksum_zero_extends_the_tail() {
    assert_eq!(boot_checksum(&[1, 0, 0, 0, 2, 0, 0, 0]), 3);
    assert_eq!(boot_checksum(&[1, 0, 0, 0, 2]), 3);
    assert_eq!(boot_checksum(&[]), 0);
  }

  #[test]
  fn patch_fills_the_info_table() {
    let mut image = vec![0u8; 128];
    image[..BOOT_STUB_LEN].fill(0xEB); // stub bytes must survive untouched
    image[64] = 1;
    image[68] = 2;

    patch_boot_info(&mut image, 16, 21);

    assert_eq!(image[0], 0xEB);
    assert_eq!(&image[8..12], &16u32.to_le_bytes());
    assert_eq!(&image[12..16], &21u32.to_le_bytes());
    assert_eq!(&image[16..20], &128u32.to_le_bytes());
    assert_eq!(&image[20..24], &3u32.to_le_bytes());
    assert!(image[24..48].iter().all(|&b| b == 0));
  }

  #[test]
  fn patch_skips_images_shorter_than_the_stub() {
    let mut image = vec![0xEBu8; 32];
    let before = image.clone();
    patch_boot_info(&mut image, 16, 21);
    assert_eq!(image, before);
  }
}

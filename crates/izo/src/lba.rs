/// Monotonic logical block allocator.
///
/// Extents are handed out in call order and never reused. Reproducible
/// images rely on every extent being allocated in the same relative order
/// across runs; the allocator itself carries no other state.
pub struct LbaAllocator {
  sector_size: u32,
  next_lba: u32,
}

impl LbaAllocator {
  pub fn new(sector_size: u32, first_lba: u32) -> Self {
    Self {
      sector_size,
      next_lba: first_lba,
    }
  }

  /// Allocates enough sectors to hold `size` bytes and returns the first LBA.
  pub fn allocate(&mut self, size: u32) -> u32 {
    let lba = self.next_lba;
    let sectors = (size + self.sector_size - 1) / self.sector_size;
    self.next_lba += sectors;
    lba
  }

  /// Allocates exactly `sectors` sectors and returns the first LBA.
  pub fn allocate_sectors(&mut self, sectors: u32) -> u32 {
    let lba = self.next_lba;
    self.next_lba += sectors;
    lba
  }

  /// One past the last allocated LBA; equals the content size of the image
  /// in sectors once layout is complete.
  pub fn next_lba(&self) -> u32 {
    self.next_lba
  }
}

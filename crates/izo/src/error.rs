#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("walkdir error: {0}")]
  WalkDir(#[from] walkdir::Error),
  #[error("Entry has no registered parent directory: {0}")]
  OrphanedEntry(String),
  #[error("Capacity exceeded: {0}")]
  Capacity(&'static str),
  #[error("Image content needs {need} bytes but the target holds only {have}")]
  ImageTooSmall { need: u64, have: u64 },
  #[error("Invalid volume date: {0:?}")]
  InvalidDate(String),
  #[error("Designated boot image was never added: {0}")]
  BootImageMissing(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use clap::Parser;
use std::path::PathBuf;

/// Build an image that is at once a bootable ISO 9660 volume and a valid
/// stored ZIP archive of the same tree.
#[derive(Debug, Parser)]
#[command(name = "mkizo", version, about)]
pub struct Cli {
  /// Output image; a regular file, or a block device to fill in place.
  #[arg(short, long)]
  pub output: PathBuf,

  /// Source directory captured into the image.
  #[arg(short, long)]
  pub source: PathBuf,

  /// Relative path (inside the source) of the boot image; enables
  /// El Torito boot support and the boot information table patch.
  #[arg(short, long)]
  pub boot: Option<String>,

  /// File appended verbatim as the archive comment, closing the image.
  #[arg(long)]
  pub comment_file: Option<PathBuf>,

  /// Overwrite an existing output file.
  #[arg(short, long)]
  pub force: bool,

  /// Fail on entries whose parent directory was never walked instead of
  /// skipping them.
  #[arg(long)]
  pub strict: bool,

  /// Raise log verbosity; repeat for trace output.
  #[arg(short, long, action = clap::ArgAction::Count)]
  pub verbose: u8,

  #[arg(long, env = "MKIZO_SYSTEM_ID", default_value = "system_id")]
  pub system_id: String,

  #[arg(long, env = "MKIZO_VOLUME_ID", default_value = "volume_id")]
  pub volume_id: String,

  #[arg(long, env = "MKIZO_VOLUME_SET_ID", default_value = "volume_set_id")]
  pub volume_set_id: String,

  #[arg(long, env = "MKIZO_PUBLISHER_ID", default_value = "publisher_id")]
  pub publisher_id: String,

  #[arg(long, env = "MKIZO_PREPARER_ID", default_value = "preparer_id")]
  pub preparer_id: String,

  #[arg(long, env = "MKIZO_APPLICATION_ID", default_value = "application_id")]
  pub application_id: String,

  /// Volume dates: decimal `YYYYMMDDHHMMSSCC` prefixes, optionally with a
  /// `+HHMM`/`-HHMM` offset; unspecified positions fill with zeros.
  #[arg(long, env = "MKIZO_CREATION_DATE", default_value = "")]
  pub creation_date: String,

  #[arg(long, env = "MKIZO_MODIFICATION_DATE", default_value = "")]
  pub modification_date: String,

  #[arg(long, env = "MKIZO_EXPIRATION_DATE", default_value = "")]
  pub expiration_date: String,

  #[arg(long, env = "MKIZO_EFFECTIVE_DATE", default_value = "")]
  pub effective_date: String,
}

pub fn parse() -> Cli {
  Cli::parse()
}

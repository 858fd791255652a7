mod cli;

use izo::spec::DecimalDateTime;
use izo::{ImageBuilder, ImageOptions, ImageSize, OrphanPolicy};
use std::io::{Seek, SeekFrom};
use std::path::Path;

fn main() {
  let cli = cli::parse();
  init_logging(cli.verbose);

  if let Err(err) = run(cli) {
    log::error!("{err}");
    std::process::exit(1);
  }
}

fn init_logging(verbose: u8) {
  let mut builder = pretty_env_logger::formatted_builder();

  // RUST_LOG wins over the flag when set.
  if let Ok(spec) = std::env::var("RUST_LOG") {
    builder.parse_filters(&spec);
  } else {
    builder.filter_level(match verbose {
      0 => log::LevelFilter::Info,
      1 => log::LevelFilter::Debug,
      _ => log::LevelFilter::Trace,
    });
  }

  builder.init();
}

fn run(cli: cli::Cli) -> Result<(), izo::Error> {
  izo::zip::self_test();

  let comment = match &cli.comment_file {
    Some(path) => std::fs::read(path)?,
    None => Vec::new(),
  };

  let (out, size) = open_output(&cli.output, cli.force)?;

  let options = ImageOptions {
    system_id: cli.system_id,
    volume_id: cli.volume_id,
    volume_set_id: cli.volume_set_id,
    publisher_id: cli.publisher_id,
    preparer_id: cli.preparer_id,
    application_id: cli.application_id,
    creation_date: DecimalDateTime::parse(&cli.creation_date)?,
    modification_date: DecimalDateTime::parse(&cli.modification_date)?,
    expiration_date: DecimalDateTime::parse(&cli.expiration_date)?,
    effective_date: DecimalDateTime::parse(&cli.effective_date)?,
    boot: cli.boot,
    comment,
    orphan_policy: if cli.strict {
      OrphanPolicy::Fail
    } else {
      OrphanPolicy::Skip
    },
    size,
  };

  let mut builder = ImageBuilder::new(out, options);
  builder.capture(&cli.source)?;

  let out = builder.finish()?;
  out.sync_all()?;

  Ok(())
}

/// Opens the output target. Block devices are written in place and pin the
/// image to the device capacity; regular files are created fresh, replaced
/// only under `--force`.
fn open_output(path: &Path, force: bool) -> Result<(std::fs::File, ImageSize), izo::Error> {
  #[cfg(unix)]
  if let Ok(metadata) = std::fs::metadata(path) {
    use std::os::unix::fs::FileTypeExt;

    if metadata.file_type().is_block_device() {
      let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
      let capacity = file.seek(SeekFrom::End(0))?;
      log::info!("block device {}: {} bytes", path.display(), capacity);
      return Ok((file, ImageSize::Fixed(capacity)));
    }
  }

  let file = if force {
    // Unlink first so a previous image's tail never survives the rewrite.
    let _ = std::fs::remove_file(path);
    std::fs::File::create(path)?
  } else {
    std::fs::OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(path)?
  };

  Ok((file, ImageSize::RoundToMegabyte))
}

//! Command-line front end: reads or writes a full memory card image over a
//! Linux SPI bus (SPEC_FULL.md §6).

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use gcm_card::diff::write_diff;
use gcm_card::error::{DriverError, Result};
use gcm_card::hw::{GpioSignal, SpidevBus};
use gcm_card::progress::ProgressSink;
use gcm_card::session::{Session, SessionOptions, READ_PAGE_SIZE};
use gcm_card::transport::CompletionSignal;

/// Host-side reader/writer for GameCube memory cards attached over SPI.
#[derive(Parser, Debug)]
#[command(name = "gcm-card", about = "Read or write a GameCube memory card image")]
struct CliArgs {
    /// Path to the SPI character device the card is attached to.
    #[arg(long, default_value = "/dev/spidev0.0")]
    spi: String,

    /// Native SPI clock rate in Hz, once the card's geometry is known.
    #[arg(long, default_value_t = 16_000_000)]
    speed_hz: u32,

    /// GPIO character device carrying the card's INT line, if wired up.
    #[arg(long, requires = "gpio_int_line")]
    gpiochip: Option<String>,

    /// Line offset on --gpiochip for the card's INT signal.
    #[arg(long, requires = "gpiochip")]
    gpio_int_line: Option<u32>,

    /// Read the full card image to this file.
    #[arg(short = 'r', long, value_name = "FILE", conflicts_with = "write")]
    read: Option<PathBuf>,

    /// Writes any page from NEW which differs from OLD.
    #[arg(
        short = 'w',
        long,
        num_args = 2,
        value_names = ["OLD", "NEW"],
        conflicts_with = "read"
    )]
    write: Option<Vec<PathBuf>>,

    /// Enable debug-level logging.
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn run(args: &CliArgs) -> Result<()> {
    let mut bus = SpidevBus::open(&args.spi, args.speed_hz)?;
    let mut signal = match (&args.gpiochip, args.gpio_int_line) {
        (Some(chip), Some(line)) => Some(GpioSignal::open(chip, line)?),
        _ => None,
    };
    let signal_ref: Option<&mut dyn CompletionSignal> =
        signal.as_mut().map(|s| s as &mut dyn CompletionSignal);

    let mut session = Session::open(&mut bus, signal_ref, SessionOptions::default())?;
    describe(&mut session)?;

    if let Some(path) = &args.read {
        read_card_to_file(&mut session, path)?;
    } else if let Some(paths) = &args.write {
        write_file_to_card(&mut session, &paths[0], &paths[1])?;
    }

    Ok(())
}

fn describe(session: &mut Session) -> Result<()> {
    log::info!(
        "card size={} turnaround={}B sector_size=0x{:x} sectors={}",
        session.card_size(),
        session.turnaround_bytes(),
        session.sector_size(),
        session.card_size() / session.sector_size(),
    );
    if let Some(id) = session.flash_id() {
        log::info!("flash id={id:02x?}");
    }
    let maker_id = session.get_id()?;
    log::info!("maker/model id={maker_id:02x?}");
    let status = session.get_status()?;
    log::info!("status={status}");

    let header = session.get_header()?;
    log::info!(
        "header: serial={:02x?} (decoded: {:02x?}) time={:016x} bias={} lang={} device_id={} size={}Mb encoding={}",
        header.serial,
        header.decoded_serial(),
        header.time,
        header.bias,
        header.lang,
        header.device_id,
        header.size_megabits,
        header.encoding,
    );

    match session.flash_id() {
        None => log::info!("cannot check serial consistency"),
        Some(flash_id) if flash_id == header.decoded_serial() => {
            log::info!("header serial is consistent with card id")
        }
        Some(_) => log::warn!("header serial is NOT consistent with card id"),
    }

    if header.checksum_is_consistent()? {
        log::info!("header checksum consistent");
    } else {
        log::warn!("header checksum NOT consistent");
    }
    Ok(())
}

fn read_card_to_file(session: &mut Session, path: &PathBuf) -> Result<()> {
    let card_size = session.card_size() as usize;
    let total_pages = card_size as u64 / READ_PAGE_SIZE as u64;
    let mut bar = CliProgress::new(total_pages);
    bar.on_start(total_pages);

    let mut image = Vec::with_capacity(card_size);
    for address in (0..card_size).step_by(READ_PAGE_SIZE) {
        let chunk = session.read_page(address as u32, READ_PAGE_SIZE)?;
        image.extend(chunk);
        bar.on_step();
    }
    bar.on_finish();

    fs::write(path, &image).map_err(DriverError::Io)?;
    log::info!("wrote {} bytes to {}", image.len(), path.display());
    Ok(())
}

fn write_file_to_card(session: &mut Session, old_path: &PathBuf, new_path: &PathBuf) -> Result<()> {
    let old_image = fs::read(old_path).map_err(DriverError::Io)?;
    let new_image = fs::read(new_path).map_err(DriverError::Io)?;
    let card_size = session.card_size() as usize;
    if old_image.len() != card_size {
        return Err(DriverError::SizeMismatch {
            expected: card_size,
            actual: old_image.len(),
        });
    }
    if new_image.len() != card_size {
        return Err(DriverError::SizeMismatch {
            expected: card_size,
            actual: new_image.len(),
        });
    }

    let mut bar = CliProgress::new(0);
    let written = write_diff(session, &old_image, &new_image, &mut bar)?;
    log::info!(
        "wrote {written} changed sector(s) diffing {} -> {}",
        old_path.display(),
        new_path.display(),
    );
    Ok(())
}

/// `ProgressSink` backed by an `indicatif` progress bar.
struct CliProgress {
    bar: Option<ProgressBar>,
    total: u64,
}

impl CliProgress {
    fn new(total: u64) -> Self {
        CliProgress { bar: None, total }
    }
}

impl ProgressSink for CliProgress {
    fn on_start(&mut self, total: u64) {
        self.total = total;
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar = Some(bar);
    }

    fn on_step(&mut self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

//! VISA Console
//!
//! Interactive console for a SCPI instrument reached over VISA. Finds the
//! instrument, opens it, prints its description and then reads commands
//! from stdin until `exit`. Every output of a BK 9130B is switched off when
//! the console closes the device.
//!
//! # Usage
//!
//! ```bash
//! # First USB instrument, system VISA library
//! cargo run --features instrument_visa --bin visa_console
//!
//! # Explicit resource with an exclusive lock
//! cargo run --features instrument_visa --bin visa_console -- \
//!     --resource "USB0::0xFFFF::0x9130::802200000000000000::INSTR" --lock exclusive
//!
//! # Simulated 9130B, no VISA installation needed
//! cargo run --bin visa_console -- --mock --timeout-ms 50
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::io;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info, warn};
use visa_psu::config::PsuConfig;
use visa_psu::console;
use visa_psu::logging::{self, OutputFormat, TracingConfig};
use visa_psu::psu::{all_outputs_off, simulated_bk9130b, LockMode};
use visa_psu::visa::{VisaDevice, VisaDriver};

/// Resource name of the simulated supply.
const MOCK_RESOURCE: &str = "USB0::0xFFFF::0x9130::802200000000000000::INSTR";

/// Discovery expression unless configured otherwise.
const DEFAULT_SEARCH: &str = "USB?*";

/// VISA Console - talk to a SCPI instrument line by line
#[derive(Parser, Debug)]
#[command(name = "visa_console")]
#[command(version = "0.1.0")]
#[command(about = "Interactive console for VISA instruments", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config/visa_psu.toml")]
    config: PathBuf,

    /// Resource to open instead of the first discovered one
    #[arg(short, long)]
    resource: Option<String>,

    /// Discovery expression
    #[arg(short, long)]
    search: Option<String>,

    /// I/O timeout and query settle delay in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Lock taken when opening
    #[arg(short, long, value_enum)]
    lock: Option<LockArg>,

    /// Use a simulated BK 9130B instead of the VISA library
    #[arg(long)]
    mock: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, default_value = "compact")]
    log_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LockArg {
    None,
    Shared,
    Exclusive,
}

impl From<LockArg> for LockMode {
    fn from(arg: LockArg) -> Self {
        match arg {
            LockArg::None => LockMode::None,
            LockArg::Shared => LockMode::Shared,
            LockArg::Exclusive => LockMode::Exclusive,
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("[ERROR]: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let level = logging::parse_log_level(&config.application.log_level).map_err(anyhow::Error::msg)?;
    logging::init(&TracingConfig::new(level).with_format(args.log_format)).map_err(anyhow::Error::msg)?;

    if args.mock {
        info!(resource = MOCK_RESOURCE, "Using simulated BK 9130B");
        let device = VisaDevice::new(simulated_bk9130b(MOCK_RESOURCE));
        return run_console(device, &config);
    }
    run_system_visa(&config)
}

#[cfg(feature = "instrument_visa")]
fn run_system_visa(config: &PsuConfig) -> Result<()> {
    run_console(VisaDevice::new(visa_psu::visa::NiVisa::new()), config)
}

#[cfg(not(feature = "instrument_visa"))]
fn run_system_visa(_config: &PsuConfig) -> Result<()> {
    Err(visa_psu::error::DaqError::VisaFeatureDisabled).context("use --mock for a simulated instrument")
}

/// Config file and environment, then command-line overrides.
fn load_config(args: &Args) -> Result<PsuConfig> {
    let mut defaults = PsuConfig::default();
    defaults.instrument.search_expression = DEFAULT_SEARCH.to_string();
    let mut config = PsuConfig::load_with_defaults(defaults, &args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(resource) = &args.resource {
        config.instrument.resource = Some(resource.clone());
    }
    if let Some(search) = &args.search {
        config.instrument.search_expression = search.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.instrument.timeout_ms = timeout_ms;
    }
    if let Some(lock) = args.lock {
        config.instrument.lock_mode = lock.into();
    }
    if let Some(level) = &args.log_level {
        config.application.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run_console<D: VisaDriver>(device: VisaDevice<D>, config: &PsuConfig) -> Result<()> {
    let settings = &config.instrument;
    let mut device = device.with_attr_max_length(settings.attr_max_length);
    if !device.is_initialized() {
        bail!("VISA resource manager unavailable: {}", device.take_last_error());
    }

    let resource = match &settings.resource {
        Some(resource) => resource.clone(),
        None => {
            let found = device.find_instruments(&settings.search_expression);
            match found.into_iter().next() {
                Some(first) => first,
                None => bail!("Failed to find device matching '{}'!", settings.search_expression),
            }
        }
    };

    let timeout = Duration::from_millis(settings.timeout_ms);
    if device
        .open(&resource, settings.lock_mode.into(), timeout)
        .is_err()
    {
        bail!("Failed to open device {}: {}", resource, device.take_last_error());
    }

    match device.device_description() {
        Ok(description) => println!("[IFO]: Connected to device - {}", description),
        Err(_) => warn!(reason = %device.take_last_error(), "Device description unavailable"),
    }

    device.on_close_sequence(all_outputs_off());

    let stdin = io::stdin();
    let stdout = io::stdout();
    console::run(&mut device, stdin.lock(), stdout.lock(), settings.read_buffer)?;

    if device.close().is_err() {
        error!(reason = %device.take_last_error(), "Failed to close device");
        bail!("Failed to close device {}", resource);
    }
    let warning = device.take_last_error();
    if !warning.is_empty() {
        eprint!("{}", warning);
    }
    Ok(())
}

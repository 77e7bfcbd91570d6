mod caltables;
mod info;
mod process;

use std::collections::BTreeSet;
use std::io::stderr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use pusgse::batch::{BatchConfig, Decompressor};
use pusgse::calibration::Calibrations;
use pusgse::mib::Mib;
use pusgse::pus::MissionProfile;
use pusgse::spacepacket::Apid;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct telemetry dumps and write their products.
    ///
    /// Each input is written to its own directory under --output, named after the
    /// input file; inputs with the same file stem are rejected. Complete science
    /// entities are written as <obsid>_<cecounter>_<seq>.ce, damaged ones under bad/,
    /// together with housekeeping.json and report.json.
    ///
    /// Inputs are processed in parallel.
    Process {
        /// MIB JSON file used to decode housekeeping packets.
        #[arg(short, long, value_name = "path")]
        mib: Option<PathBuf>,

        /// Calibration JSON file merged with the built-in calibrations.
        #[arg(short, long, value_name = "path")]
        calibrations: Option<PathBuf>,

        /// Do not use the built-in calibrations.
        #[arg(long, action)]
        no_builtin: bool,

        /// Mission profile; one of pus-a, pus-c, pus-c-compact or a profile JSON file.
        #[arg(short, long, default_value = "pus-c-compact")]
        profile: String,

        /// Program run for every complete entity as `<program> [args..] <input> <output>`.
        #[arg(short, long, value_name = "path")]
        decompressor: Option<PathBuf>,

        /// Extra argument passed to the decompressor; may be repeated.
        #[arg(long = "decompressor-arg", value_name = "arg", allow_hyphen_values = true)]
        decompressor_args: Vec<String>,

        /// Only write housekeeping for these APIDs or APID ranges.
        ///
        /// This accepts a CSV of APIDs as well as ranges of the format <start>-<end>
        /// where start and end are inclusive, e.g., --apids 0-5,10,20.
        #[arg(short, long, value_name = "csv", value_delimiter = ',')]
        apids: Vec<String>,

        /// Number of inputs to process concurrently. Defaults to the number of CPUs.
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Output directory.
        #[arg(short, long, default_value = ".", value_name = "path")]
        output: PathBuf,

        /// Input telemetry dumps.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Show the reconstruction report for a dump without writing any products.
    Info {
        /// Input telemetry dump.
        input: PathBuf,

        /// MIB JSON file used to identify housekeeping packets.
        #[arg(short, long, value_name = "path")]
        mib: Option<PathBuf>,

        /// Mission profile; one of pus-a, pus-c, pus-c-compact or a profile JSON file.
        #[arg(short, long, default_value = "pus-c-compact")]
        profile: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,
    },
    /// Write calibration tables, one `<signal>.txt` per signal.
    ///
    /// Each table has a raw count and its engineering value per line, over the signal's
    /// calibrated range. Signals without a calibrated range are skipped unless named.
    Caltables {
        /// Calibration JSON file merged with the built-in calibrations.
        #[arg(short, long, value_name = "path")]
        calibrations: Option<PathBuf>,

        /// Do not use the built-in calibrations.
        #[arg(long, action)]
        no_builtin: bool,

        /// Raw count step between table rows.
        #[arg(short, long, default_value = "1")]
        step: usize,

        /// Output directory.
        #[arg(short, long, default_value = ".", value_name = "path")]
        output: PathBuf,

        /// Signals to write; all signals if none are given.
        signals: Vec<String>,
    },
    /// Convert a single value using a signal calibration.
    Calibrate {
        /// Calibration JSON file merged with the built-in calibrations.
        #[arg(short, long, value_name = "path")]
        calibrations: Option<PathBuf>,

        /// Convert an engineering value to raw counts instead.
        #[arg(short, long, action)]
        inverse: bool,

        signal: String,

        #[arg(allow_hyphen_values = true)]
        value: f64,
    },
}

fn parse_number_ranges(list: Vec<String>) -> Result<Vec<u32>> {
    let rx = regex::Regex::new(r"^(?:(\d+)|(\d+)-(\d+))$").map_err(|e| anyhow!("{e}"))?;
    let mut values = Vec::default();
    for (i, s) in list.into_iter().enumerate() {
        let Some(cap) = rx.captures(s.trim()) else {
            bail!("invalid number or range {s:?} at {i}");
        };

        if cap.get(1).is_some() {
            let x = cap[1]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid number value {s:?}"))?;
            values.push(x);
        } else {
            let start = cap[2]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value {s:?}"))?;
            let end = cap[3]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value {s:?}"))?;
            if start > end {
                bail!("invalid range {s:?}")
            }
            values.extend(start..=end);
        }
    }

    Ok(values)
}

fn parse_apids(list: &[String]) -> Result<Option<BTreeSet<Apid>>> {
    if list.is_empty() {
        return Ok(None);
    }
    let mut apids = BTreeSet::default();
    for v in parse_number_ranges(list.to_vec())? {
        match Apid::try_from(v) {
            Ok(apid) if apid <= 0x7ff => {
                apids.insert(apid);
            }
            _ => bail!("APID {v} out of range"),
        }
    }
    Ok(Some(apids))
}

fn load_profile(name: &str) -> Result<MissionProfile> {
    if let Some(profile) = MissionProfile::by_name(name) {
        return Ok(profile);
    }
    MissionProfile::from_file(name).with_context(|| format!("loading mission profile {name:?}"))
}

fn load_mib(path: Option<&PathBuf>) -> Result<Mib> {
    match path {
        Some(path) => Mib::from_file(path).with_context(|| format!("loading MIB from {path:?}")),
        None => Ok(Mib::default()),
    }
}

fn load_calibrations(path: Option<&PathBuf>, no_builtin: bool) -> Result<Calibrations> {
    match path {
        Some(path) => Calibrations::with_file(path, !no_builtin)
            .with_context(|| format!("loading calibrations from {path:?}")),
        None if no_builtin => bail!("--no-builtin requires --calibrations"),
        None => Calibrations::builtin().context("loading built-in calibrations"),
    }
}

fn batch_config(
    profile: &str,
    mib: Option<&PathBuf>,
    calibrations: Option<&PathBuf>,
    no_builtin: bool,
    decompressor: Option<&Path>,
    decompressor_args: &[String],
    apids: &[String],
) -> Result<BatchConfig> {
    let decompressor = decompressor.map(|p| {
        let mut d = Decompressor::new(p);
        d.args = decompressor_args.to_vec();
        d
    });
    Ok(BatchConfig {
        profile: load_profile(profile)?,
        mib: load_mib(mib)?,
        calibrations: Some(load_calibrations(calibrations, no_builtin)?),
        decompressor,
        apids: parse_apids(apids)?,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("PUSGSE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Process {
            mib,
            calibrations,
            no_builtin,
            profile,
            decompressor,
            decompressor_args,
            apids,
            jobs,
            output,
            inputs,
        } => {
            let config = batch_config(
                profile,
                mib.as_ref(),
                calibrations.as_ref(),
                *no_builtin,
                decompressor.as_deref(),
                decompressor_args,
                apids,
            )?;
            debug!(profile = %config.profile.name, apids = ?config.apids, "configured");
            process::process(inputs, output, &config, *jobs)
        }
        Commands::Info {
            input,
            mib,
            profile,
            format,
        } => {
            let profile = load_profile(profile)?;
            let mib = load_mib(mib.as_ref())?;
            info::info(input, &profile, &mib, format)
        }
        Commands::Caltables {
            calibrations,
            no_builtin,
            step,
            output,
            signals,
        } => {
            if *step == 0 {
                bail!("--step must be greater than 0");
            }
            let cals = load_calibrations(calibrations.as_ref(), *no_builtin)?;
            caltables::write_tables(&cals, signals, output, *step)?;
            Ok(())
        }
        Commands::Calibrate {
            calibrations,
            inverse,
            signal,
            value,
        } => {
            let cals = load_calibrations(calibrations.as_ref(), false)?;
            caltables::convert(&cals, signal, *value, *inverse)
        }
    }
}

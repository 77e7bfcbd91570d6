//! File-level processing: reconstruct a dump and write its products.
//!
//! For an input dump `process_file` writes to the output directory:
//!
//! * `<obsid>_<cecounter>_<seq>.ce` for every complete entity, plus whatever the
//!   configured decompressor produces for it
//! * `bad/<obsid>_<cecounter>_<seq>.ce` for entities that ended abnormally
//!
//! An entity whose name is already taken in this run, e.g. a retransmitted CE, is
//! written as `<obsid>_<cecounter>_<seq>-<n>.ce` with `n` counting from 2.
//!
//! * `housekeeping.json` with the decoded and calibrated housekeeping packets
//! * `report.json` with the [ReconstructionReport] and entity metadata
use std::{
    collections::{BTreeSet, HashSet},
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
    process::Command,
};

use hifitime::Epoch;
use serde::Serialize;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::calibration::Calibrations;
use crate::downlink::{
    Downlink, DownlinkEntity, EntityState, HousekeepingPacket, ReconstructionReport,
};
use crate::mib::{Mib, MibSource, Value};
use crate::prelude::*;
use crate::pus::MissionProfile;
use crate::spacepacket::Apid;

pub const HOUSEKEEPING_FILE: &str = "housekeeping.json";
pub const REPORT_FILE: &str = "report.json";
pub const BAD_DIR: &str = "bad";

/// External program run once per complete entity as `program [args..] <input> <output>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompressor {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Decompressor {
    #[must_use]
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// # Errors
    /// [Error::Decompressor] if the program cannot be started or exits unsuccessfully.
    pub fn run(&self, input: &Path, output: &Path) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .status()
            .map_err(|err| Error::Decompressor(format!("{:?}: {err}", self.program)))?;
        if !status.success() {
            return Err(Error::Decompressor(format!(
                "{:?} exited with {status} for {input:?}",
                self.program
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct BatchConfig {
    #[builder(default)]
    pub profile: MissionProfile,
    #[builder(default)]
    pub mib: Mib,
    #[builder(default, setter(strip_option))]
    pub calibrations: Option<Calibrations>,
    #[builder(default, setter(strip_option))]
    pub decompressor: Option<Decompressor>,
    /// Only write housekeeping for these APIDs.
    #[builder(default, setter(strip_option))]
    pub apids: Option<BTreeSet<Apid>>,
}

#[derive(Debug, Clone, Serialize)]
struct HousekeepingParameter<'a> {
    name: &'a str,
    raw: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    eng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_range: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct HousekeepingRecord<'a> {
    offset: usize,
    apid: Apid,
    sequence_id: u16,
    time: String,
    packet: Option<&'a str>,
    decoded: bool,
    parameters: Vec<HousekeepingParameter<'a>>,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    input: &'a Path,
    report: &'a ReconstructionReport,
    entities: &'a [DownlinkEntity],
    bad_entities: &'a [DownlinkEntity],
    products: &'a [PathBuf],
}

/// File name for an entity blob.
#[must_use]
pub fn entity_file_name(entity: &DownlinkEntity) -> String {
    match &entity.header {
        Some(hdr) => format!("{}_{}_{}.ce", hdr.obs_id, hdr.ce_counter, entity.sequence),
        None => format!(
            "unknown_{}_{}.ce",
            entity.transmission_id, entity.sequence
        ),
    }
}

/// `dir/name`, or the first free `dir/<stem>-<n>.ce` if that path was already taken.
fn unique_path(dir: &Path, name: &str, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let mut path = dir.join(name);
    let stem = name.strip_suffix(".ce").unwrap_or(name);
    let mut n = 1;
    while !taken.insert(path.clone()) {
        n += 1;
        path = dir.join(format!("{stem}-{n}.ce"));
    }
    if n > 1 {
        warn!(entity = name, ?path, "duplicate entity name");
    }
    path
}

fn calibrate<'a>(
    config: &'a BatchConfig,
    hk: &'a HousekeepingPacket,
    mission_epoch: Epoch,
) -> HousekeepingRecord<'a> {
    let parameters = hk
        .packet
        .values
        .iter()
        .map(|p| {
            let mut param = HousekeepingParameter {
                name: &p.name,
                raw: &p.value,
                eng: None,
                unit: config.mib.parameter(&p.name).and_then(|r| r.unit.as_deref()),
                in_range: None,
            };
            let signal = config.mib.lookup_calibration(&p.name);
            if let (Some(signal), Some(cals), Some(raw)) =
                (signal, &config.calibrations, p.value.as_f64())
            {
                match cals.raw_to_eng(raw, signal) {
                    Ok(cal) => {
                        param.eng = Some(cal.value);
                        param.in_range = Some(cal.in_range);
                        if param.unit.is_none() {
                            param.unit = cals.get(signal).map(|s| s.unit.as_str());
                        }
                    }
                    Err(err) => debug!(parameter = %p.name, "not calibrated: {err}"),
                }
            }
            param
        })
        .collect();

    HousekeepingRecord {
        offset: hk.offset,
        apid: hk.apid,
        sequence_id: hk.sequence_id,
        time: hk.time.epoch(mission_epoch).to_string(),
        packet: hk.packet.name.as_deref(),
        decoded: hk.packet.decoded,
        parameters,
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Reconstruct the dump at `input` and write its products to `output_dir`.
///
/// Damaged input never fails the batch; only I/O errors and invalid configuration do.
/// A failing decompressor is logged and its entity's blob is kept.
///
/// # Errors
/// [Error::Io] if the input cannot be read or the outputs cannot be written, or
/// [Error::Format] if the profile's epoch is invalid.
pub fn process_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output_dir: Q,
    config: &BatchConfig,
) -> Result<Vec<PathBuf>> {
    let input = input.as_ref();
    let output_dir = output_dir.as_ref();
    let mission_epoch = config.profile.mission_epoch()?;

    let data = fs::read(input)?;
    debug!(?input, bytes = data.len(), "read input");
    let recon = Downlink::new(&config.profile, &config.mib).reconstruct(&data);

    fs::create_dir_all(output_dir)?;
    let mut products = Vec::new();
    let mut taken = HashSet::new();

    for entity in &recon.entities {
        let path = unique_path(output_dir, &entity_file_name(entity), &mut taken);
        fs::write(&path, &entity.data)?;
        products.push(path.clone());
        if let Some(decompressor) = &config.decompressor {
            let out = path.with_extension("dat");
            match decompressor.run(&path, &out) {
                Ok(()) => products.push(out),
                Err(err) => warn!(entity = ?path, "{err}"),
            }
        }
    }

    if !recon.bad_entities.is_empty() {
        let bad_dir = output_dir.join(BAD_DIR);
        fs::create_dir_all(&bad_dir)?;
        for entity in &recon.bad_entities {
            let path = unique_path(&bad_dir, &entity_file_name(entity), &mut taken);
            fs::write(&path, &entity.data)?;
            products.push(path);
        }
    }

    let records: Vec<HousekeepingRecord> = recon
        .housekeeping
        .iter()
        .filter(|hk| config.apids.as_ref().map_or(true, |a| a.contains(&hk.apid)))
        .map(|hk| calibrate(config, hk, mission_epoch))
        .collect();
    let hk_path = output_dir.join(HOUSEKEEPING_FILE);
    write_json(&hk_path, &records)?;
    products.push(hk_path);

    let report_path = output_dir.join(REPORT_FILE);
    products.push(report_path.clone());
    write_json(
        &report_path,
        &Report {
            input,
            report: &recon.report,
            entities: &recon.entities,
            bad_entities: &recon.bad_entities,
            products: &products,
        },
    )?;

    let incomplete = recon
        .bad_entities
        .iter()
        .filter(|e| e.state == EntityState::IncompleteAtEof)
        .count();
    info!(
        ?input,
        entities = recon.report.entities,
        bad_entities = recon.report.bad_entities,
        incomplete,
        crc_mismatches = recon.report.crc_mismatches,
        skipped_bytes = recon.report.skipped_bytes,
        unidentified = recon.report.unidentified_packets,
        "processed"
    );
    Ok(products)
}

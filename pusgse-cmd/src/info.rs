use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use pusgse::downlink::{Downlink, DownlinkEntity, EntityState, ReconstructionReport};
use pusgse::mib::Mib;
use pusgse::pus::MissionProfile;
use serde::Serialize;
use std::{
    io::{stdout, Write},
    path::Path,
};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Entity {
    transmission_id: u8,
    obs_id: Option<u32>,
    ce_counter: Option<u16>,
    sequence: u16,
    segments: usize,
    gaps: usize,
    bytes: usize,
    state: EntityState,
}

impl From<&DownlinkEntity> for Entity {
    fn from(e: &DownlinkEntity) -> Self {
        Self {
            transmission_id: e.transmission_id,
            obs_id: e.header.map(|h| h.obs_id),
            ce_counter: e.header.map(|h| h.ce_counter),
            sequence: e.sequence,
            segments: e.segments,
            gaps: e.gaps.len(),
            bytes: e.data.len(),
            state: e.state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    profile: String,
    gaps: usize,
    report: ReconstructionReport,
    entities: Vec<Entity>,
    bad_entities: Vec<Entity>,
}

fn summarize(fpath: &Path, profile: &MissionProfile, mib: &Mib) -> Result<Info> {
    let data = std::fs::read(fpath).context("reading input")?;
    debug!(bytes = data.len(), "read {fpath:?}");
    let recon = Downlink::new(profile, mib).reconstruct(&data);

    Ok(Info {
        filename: fpath.to_string_lossy().to_string(),
        profile: profile.name.clone(),
        gaps: recon.report.sequence_gaps.len(),
        entities: recon.entities.iter().map(Entity::from).collect(),
        bad_entities: recon.bad_entities.iter().map(Entity::from).collect(),
        report: recon.report,
    })
}

pub fn info(fpath: &Path, profile: &MissionProfile, mib: &Mib, format: &Format) -> Result<()> {
    let info = summarize(fpath, profile, mib)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => "-".to_string(),
            _ => v.to_string()
        };
        let width = usize::try_from(num).unwrap_or(0).max(v.len());
        format!("{v:>width$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("compiling template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }} ({{ profile }})
===============================================================================
Packets:        {{ report.packets }} ({{ report.summary.bytes }} bytes, {{ report.summary.missing }} missing)
CRC mismatches: {{ report.crc_mismatches }}
Skipped bytes:  {{ report.skipped_bytes }}
Non-PUS:        {{ report.non_pus_packets }}
Segments:       {{ report.segments }} ({{ report.invalid_segments }} invalid, {{ report.orphan_segments }} orphaned)
Gaps:           {{ gaps }}
Entities:       {{ report.entities }} ({{ report.bad_entities }} bad, {{ report.discarded_entities }} discarded)
Housekeeping:   {{ report.housekeeping_packets }} ({{ report.unidentified_packets }} unidentified)
-------------------------------------------------------------------------------
APID     Count        Bytes   Missing
-------------------------------------------------------------------------------
{{ #each report.summary.apids }}{{ lpad 4 @key }}  {{ lpad 8 count }}  {{ lpad 11 bytes }}  {{ lpad 8 missing }}
{{ /each }}-------------------------------------------------------------------------------
TID    ObsID   CE     Seq   Segments   Gaps      Bytes  State
-------------------------------------------------------------------------------
{{ #each entities }}{{ lpad 3 transmission_id }}  {{ lpad 7 obs_id }}  {{ lpad 4 ce_counter }}  {{ lpad 5 sequence }}  {{ lpad 9 segments }}  {{ lpad 5 gaps }}  {{ lpad 9 bytes }}  {{ state }}
{{ /each }}{{ #each bad_entities }}{{ lpad 3 transmission_id }}  {{ lpad 7 obs_id }}  {{ lpad 4 ce_counter }}  {{ lpad 5 sequence }}  {{ lpad 9 segments }}  {{ lpad 5 gaps }}  {{ lpad 9 bytes }}  {{ state }}
{{ /each }}";

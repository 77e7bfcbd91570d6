use std::{
    fs::{self, File},
    io::{stdout, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use pusgse::calibration::Calibrations;
use tracing::{info, warn};

/// Write `<signal>.txt` for each of `signals`, or every signal with a calibrated range.
pub fn write_tables(
    cals: &Calibrations,
    signals: &[String],
    output: &Path,
    step: usize,
) -> Result<Vec<PathBuf>> {
    let names: Vec<&str> = if signals.is_empty() {
        cals.signals()
            .filter(|s| {
                let ok = cals.range(&s.name).is_some();
                if !ok {
                    warn!(signal = %s.name, "no calibrated range; skipping");
                }
                ok
            })
            .map(|s| s.name.as_str())
            .collect()
    } else {
        signals.iter().map(String::as_str).collect()
    };
    if names.is_empty() {
        bail!("no calibration tables to write");
    }

    fs::create_dir_all(output).with_context(|| format!("creating {output:?}"))?;
    let mut written = Vec::with_capacity(names.len());
    for name in names {
        let path = output.join(format!("{name}.txt"));
        let mut writer =
            BufWriter::new(File::create(&path).with_context(|| format!("creating {path:?}"))?);
        cals.write_table(name, &mut writer, step)
            .with_context(|| format!("writing table for {name}"))?;
        writer.flush()?;
        info!(signal = name, ?path, "wrote calibration table");
        written.push(path);
    }
    Ok(written)
}

pub fn convert(cals: &Calibrations, signal: &str, value: f64, inverse: bool) -> Result<()> {
    let zult = if inverse {
        cals.eng_to_raw(value, signal)
    } else {
        cals.raw_to_eng(value, signal)
    }
    .with_context(|| format!("converting {value} with {signal}"))?;

    let unit = if inverse {
        "counts"
    } else {
        cals.get(signal).map_or("", |s| s.unit.as_str())
    };
    let mut out = stdout();
    writeln!(out, "{} {unit}", zult.value)?;
    if !zult.in_range {
        writeln!(out, "(outside calibrated range)")?;
    }
    Ok(())
}

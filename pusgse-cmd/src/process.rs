use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pusgse::batch::{process_file, BatchConfig};
use rayon::prelude::*;
use tracing::{error, info};

/// Directory under `output` that receives the products of `input`.
fn product_dir(output: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "input".into(), |s| s.to_string_lossy().to_string());
    output.join(stem)
}

/// Product directory of every input. Inputs sharing a directory would overwrite each
/// other's products, so that is an error.
fn product_dirs(output: &Path, inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut seen: HashMap<PathBuf, &PathBuf> = HashMap::new();
    let mut dirs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let dest = product_dir(output, input);
        if let Some(other) = seen.insert(dest.clone(), input) {
            bail!("inputs {other:?} and {input:?} would both write to {dest:?}");
        }
        dirs.push(dest);
    }
    Ok(dirs)
}

pub fn process(
    inputs: &[PathBuf],
    output: &Path,
    config: &BatchConfig,
    jobs: Option<usize>,
) -> Result<()> {
    let dests = product_dirs(output, inputs)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.unwrap_or(0))
        .build()
        .context("creating thread pool")?;

    let results: Vec<(&PathBuf, Result<Vec<PathBuf>>)> = pool.install(|| {
        inputs
            .par_iter()
            .zip(dests.par_iter())
            .map(|(input, dest)| {
                info!(?input, ?dest, "processing");
                let zult = process_file(input, dest, config)
                    .with_context(|| format!("processing {input:?}"));
                (input, zult)
            })
            .collect()
    });

    let mut failed = 0;
    for (input, zult) in results {
        match zult {
            Ok(products) => info!(?input, products = products.len(), "done"),
            Err(err) => {
                error!("{err:#}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} inputs failed", inputs.len());
    }
    Ok(())
}

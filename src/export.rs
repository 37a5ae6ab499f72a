//! Save a recorded series as a flat text file, one value per line

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::series::Sample;

/// Decimal places written per value
pub const DEFAULT_DECIMALS: usize = 1;

pub fn write_values<W: Write>(mut out: W, samples: &[Sample], decimals: usize) -> std::io::Result<()> {
    for sample in samples {
        writeln!(out, "{:.*}", decimals, sample.value)?;
    }
    out.flush()
}

/// Write `samples` to `path`, creating parent directories
pub fn save_values(path: &Path, samples: &[Sample], decimals: usize) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_values(BufWriter::new(file), samples, decimals)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!(target: "export", "Saved {} values to {}", samples.len(), path.display());
    Ok(())
}

/// `dir/pattern_<local time>.txt`
pub fn timestamped_path(dir: &Path) -> PathBuf {
    let name = chrono::Local::now()
        .format("pattern_%Y-%m-%d_%H-%M-%S.txt")
        .to_string();
    dir.join(name)
}

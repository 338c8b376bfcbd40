use anyhow::Context;
use stackup_core::layering;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn run(files: &[PathBuf], set: &[String], output: Option<&Path>) -> anyhow::Result<()> {
    // All overrides are checked before any file is read or written.
    let overrides = layering::parse_overrides(set)?;
    let merged = layering::merge(files, &overrides)?;

    match output {
        Some(path) => merged
            .write_to(path)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(merged.render().as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

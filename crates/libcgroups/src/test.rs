//! Fixture helpers shared by the controller tests.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn set_fixture(temp_dir: &Path, filename: &str, val: &str) -> std::io::Result<PathBuf> {
    let full_path = temp_dir.join(filename);

    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&full_path)?
        .write_all(val.as_bytes())?;

    Ok(full_path)
}

//! `logs`: print (and optionally follow) a container's combined output.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use libcontainer::container::ContainerStatus;
use libcontainer::error::Result;
use libcontainer::utils;

use super::open_runtime;

#[derive(Parser, Debug)]
pub struct Logs {
    /// Keep the log open and stream new output
    #[arg(short = 'f', long)]
    pub follow: bool,

    /// Only the last N lines
    #[arg(short = 'n', long)]
    pub tail: Option<usize>,

    /// Prefix lines with the container start time (the log itself
    /// carries no per-line timestamps)
    #[arg(short = 't', long)]
    pub timestamps: bool,

    /// Container id, name, or id prefix
    pub container: String,
}

pub fn logs(args: Logs, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;
    let mut container = store.resolve_container(&args.container)?;

    let log_path = container.log_path();
    let mut content = String::new();
    if log_path.exists() {
        File::open(&log_path)?.read_to_string(&mut content)?;
    }

    let prefix = if args.timestamps {
        container
            .state
            .started_at
            .map(|at| format!("{} ", at.to_rfc3339()))
            .unwrap_or_default()
    } else {
        String::new()
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.tail {
        Some(n) => {
            for line in utils::tail_lines(&content, n) {
                writeln!(out, "{prefix}{line}")?;
            }
        }
        None => {
            for line in content.lines() {
                writeln!(out, "{prefix}{line}")?;
            }
        }
    }
    out.flush()?;

    if !args.follow {
        return Ok(0);
    }

    // stream appended data until the container stops
    let mut offset = content.len() as u64;
    loop {
        std::thread::sleep(Duration::from_millis(200));

        if log_path.exists() {
            let mut file = File::open(&log_path)?;
            let len = file.metadata()?.len();
            if len > offset {
                file.seek(SeekFrom::Start(offset))?;
                let mut chunk = String::new();
                file.read_to_string(&mut chunk)?;
                offset = len;
                for line in chunk.lines() {
                    writeln!(out, "{prefix}{line}")?;
                }
                out.flush()?;
            }
        }

        container.refresh_status()?;
        if container.status() != ContainerStatus::Running {
            break;
        }
    }
    Ok(0)
}

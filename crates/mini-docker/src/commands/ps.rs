//! `ps`: list containers. Every listing reconciles stale `running`
//! states against `/proc` first.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use clap::Parser;
use serde::Serialize;
use tabwriter::TabWriter;

use libcontainer::container::{Container, ContainerStatus};
use libcontainer::error::Result;

use super::{invalid, open_runtime};

#[derive(Parser, Debug)]
pub struct Ps {
    /// Include stopped containers
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Only print container ids
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// table or json
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Serialize)]
struct PsEntry {
    id: String,
    name: Option<String>,
    image: PathBuf,
    command: Vec<String>,
    status: ContainerStatus,
    pid: Option<i32>,
    exit_code: Option<i32>,
    created_at: String,
}

pub fn ps(args: Ps, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;

    let mut containers = vec![];
    for mut container in store.list_containers()? {
        container.refresh_status()?;
        if args.all || container.status() == ContainerStatus::Running {
            containers.push(container);
        }
    }

    if args.quiet {
        for container in &containers {
            println!("{}", container.id());
        }
        return Ok(0);
    }

    match args.format.as_str() {
        "table" => print_table(&containers)?,
        "json" => {
            let entries: Vec<PsEntry> = containers.iter().map(to_entry).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        other => return Err(invalid(format!("unknown format {other:?}"))),
    }
    Ok(0)
}

fn to_entry(container: &Container) -> PsEntry {
    PsEntry {
        id: container.id().to_owned(),
        name: container.name().map(str::to_owned),
        image: container.config.image_root.clone(),
        command: container.config.argv.clone(),
        status: container.status(),
        pid: container.state.pid,
        exit_code: container.state.exit_code,
        created_at: container.state.created_at.to_rfc3339(),
    }
}

fn print_table(containers: &[Container]) -> Result<()> {
    let mut tab_writer = TabWriter::new(std::io::stdout());
    writeln!(
        &mut tab_writer,
        "CONTAINER ID\tNAME\tIMAGE\tCOMMAND\tCREATED\tSTATUS\tPID"
    )?;

    for container in containers {
        let created: DateTime<Local> = DateTime::from(container.state.created_at);
        let status = match (container.status(), container.state.exit_code) {
            (ContainerStatus::Exited, Some(code)) => format!("exited ({code})"),
            (status, _) => status.to_string(),
        };
        writeln!(
            &mut tab_writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            container.id(),
            container.name().unwrap_or(""),
            container.config.image_root.display(),
            container.config.argv.join(" "),
            created.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
            status,
            container
                .state
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_default(),
        )?;
    }

    tab_writer.flush()?;
    Ok(())
}

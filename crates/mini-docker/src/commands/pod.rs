//! `pod`: create, populate, list, inspect and remove pods.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use clap::Parser;
use tabwriter::TabWriter;

use libcontainer::error::Result;
use libcontainer::pod;

use super::{open_runtime, run};

#[derive(Parser, Debug)]
pub enum Pod {
    /// Create a pod with pinned net, ipc and uts namespaces
    Create(PodCreate),
    /// Run a container inside a pod's namespaces
    Add(PodAdd),
    /// List pods
    Ls(PodLs),
    /// Show full pod details
    Inspect(PodInspect),
    /// Remove a pod and unpin its namespaces
    Rm(PodRm),
}

#[derive(Parser, Debug)]
pub struct PodCreate {
    /// Pod name
    pub name: String,
}

#[derive(Parser, Debug)]
pub struct PodAdd {
    /// Pod id, name, or id prefix
    #[arg(id = "target-pod", value_name = "POD")]
    pub pod: String,

    #[command(flatten)]
    pub run: run::Run,
}

#[derive(Parser, Debug)]
pub struct PodLs {}

#[derive(Parser, Debug)]
pub struct PodInspect {
    /// Pod id, name, or id prefix
    pub pod: String,
}

#[derive(Parser, Debug)]
pub struct PodRm {
    /// Remove even with running members
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Pod id, name, or id prefix
    pub pod: String,
}

pub fn pod(args: Pod, root: PathBuf) -> Result<i32> {
    match args {
        Pod::Create(create) => pod_create(create, root),
        Pod::Add(add) => pod_add(add, root),
        Pod::Ls(ls) => pod_ls(ls, root),
        Pod::Inspect(inspect) => pod_inspect(inspect, root),
        Pod::Rm(rm) => pod_rm(rm, root),
    }
}

fn pod_create(args: PodCreate, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, false)?;
    let pod = pod::create_pod(&runtime, &store, &args.name)?;
    println!("{}", pod.id);
    Ok(0)
}

fn pod_add(args: PodAdd, root: PathBuf) -> Result<i32> {
    let mut run_args = args.run;
    run_args.pod = Some(args.pod);
    run::run(run_args, root)
}

fn pod_ls(_args: PodLs, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;

    let mut tab_writer = TabWriter::new(std::io::stdout());
    writeln!(&mut tab_writer, "POD ID\tNAME\tMEMBERS\tCREATED")?;
    for id in store.list_pod_ids()? {
        let Ok(pod) = pod::Pod::load(&store.pod_root(&id)) else {
            continue;
        };
        let created: DateTime<Local> = DateTime::from(pod.created_at);
        writeln!(
            &mut tab_writer,
            "{}\t{}\t{}\t{}",
            pod.id,
            pod.name,
            pod.members.len(),
            created.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
        )?;
    }
    tab_writer.flush()?;
    Ok(0)
}

fn pod_inspect(args: PodInspect, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;
    let pod = pod::resolve_pod(&store, &args.pod)?;

    let value = serde_json::to_value(&pod)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(0)
}

fn pod_rm(args: PodRm, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;
    let pod = pod::resolve_pod(&store, &args.pod)?;
    pod::remove_pod(&store, &pod, args.force)?;
    println!("{}", pod.id);
    Ok(0)
}

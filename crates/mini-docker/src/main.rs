//! # mini-docker
//!
//! A single-host Linux container runtime: run commands in namespaced,
//! resource-limited, seccomp-confined processes, and manage their
//! lifecycle.

mod commands;
mod imagefile;
mod observability;
mod rootpath;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use libcontainer::error::RuntimeError;

#[derive(Parser, Debug)]
#[command(version, about = "a single-host Linux container runtime", author)]
struct Opts {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(clap::Args, Debug)]
struct GlobalOpts {
    /// Root of the state store (also MINI_DOCKER_HOST)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Verbose logging (also MINI_DOCKER_DEBUG)
    #[arg(long, global = true)]
    debug: bool,

    /// debug, info, warn or error (also MINI_DOCKER_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Run a command in a new container
    Run(commands::run::Run),
    /// Run a container from an OCI bundle directory
    RunOci(commands::run_oci::RunOci),
    /// Run a command inside a running container
    Exec(commands::exec::Exec),
    /// List containers
    Ps(commands::ps::Ps),
    /// Stop a running container
    Stop(commands::stop::Stop),
    /// Remove containers
    Rm(commands::rm::Rm),
    /// Show a container's log
    Logs(commands::logs::Logs),
    /// Show full container details
    Inspect(commands::inspect::Inspect),
    /// Build an image from an Imagefile
    Build(commands::build::Build),
    /// List registered images
    Images(commands::images::Images),
    /// Unregister an image
    Rmi(commands::images::Rmi),
    /// Manage pods (containers sharing namespaces)
    #[command(subcommand)]
    Pod(commands::pod::Pod),
    /// Show runtime and host information
    Info(commands::info::Info),
    /// Remove stopped containers and unused resources
    Cleanup(commands::cleanup::Cleanup),
    /// Print version information
    Version,
}

fn main() {
    // A container could rewrite the runtime binary through /proc/self/exe
    // (CVE-2019-5736 class); seal it before anything else runs.
    if let Err(err) = pentacle::ensure_sealed().context("failed to seal /proc/self/exe") {
        eprintln!("mini-docker: {err:#}");
        std::process::exit(libcontainer::error::EXIT_GENERAL);
    }

    let opts = Opts::parse();

    if let Err(err) = observability::init(opts.global.debug, opts.global.log_level.clone()) {
        eprintln!("mini-docker: log init failed: {err}");
    }

    let code = match dispatch(opts) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("mini-docker: {err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

fn dispatch(opts: Opts) -> Result<i32, RuntimeError> {
    let root = rootpath::determine(opts.global.root)
        .map_err(|err| RuntimeError::Other(format!("failed to prepare state root: {err}")))?;
    tracing::debug!(?root, "using state root");

    match opts.subcmd {
        SubCommand::Run(run) => commands::run::run(run, root),
        SubCommand::RunOci(run_oci) => commands::run_oci::run_oci(run_oci, root),
        SubCommand::Exec(exec) => commands::exec::exec(exec, root),
        SubCommand::Ps(ps) => commands::ps::ps(ps, root),
        SubCommand::Stop(stop) => commands::stop::stop(stop, root),
        SubCommand::Rm(rm) => commands::rm::rm(rm, root),
        SubCommand::Logs(logs) => commands::logs::logs(logs, root),
        SubCommand::Inspect(inspect) => commands::inspect::inspect(inspect, root),
        SubCommand::Build(build) => commands::build::build(build, root),
        SubCommand::Images(images) => commands::images::images(images, root),
        SubCommand::Rmi(rmi) => commands::images::rmi(rmi, root),
        SubCommand::Pod(pod) => commands::pod::pod(pod, root),
        SubCommand::Info(info) => commands::info::info(info, root),
        SubCommand::Cleanup(cleanup) => commands::cleanup::cleanup(cleanup, root),
        SubCommand::Version => {
            println!("mini-docker {}", clap::crate_version!());
            Ok(0)
        }
    }
}

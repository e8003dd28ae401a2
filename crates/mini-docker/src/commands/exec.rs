//! `exec`: run another command inside a live container.

use std::path::PathBuf;

use clap::Parser;

use libcontainer::container::UserSpec;
use libcontainer::error::Result;
use libcontainer::process::exec as container_exec;
use libcontainer::utils;

use super::{invalid, open_runtime};

#[derive(Parser, Debug)]
pub struct Exec {
    /// Keep stdin attached
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Allocate a pseudo-terminal
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Extra environment entries, K=V
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Working directory inside the container
    #[arg(short = 'w', long)]
    pub workdir: Option<PathBuf>,

    /// Numeric uid[:gid] to run as
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Container id, name, or id prefix
    pub container: String,

    /// Command and arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

pub fn exec(args: Exec, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, false)?;
    let mut container = store.resolve_container(&args.container)?;

    for entry in &args.env {
        if utils::parse_env_entry(entry).is_none() {
            return Err(invalid(format!("invalid environment entry {entry:?}")));
        }
    }

    let user = match &args.user {
        Some(user) => Some(user.parse::<UserSpec>().map_err(invalid)?),
        None => None,
    };

    let opts = container_exec::ExecOpts {
        argv: args.command,
        env: args.env,
        workdir: args.workdir,
        user,
        interactive: args.interactive,
        tty: args.tty,
    };

    container_exec::exec(&runtime, &store, &mut container, opts)
}

//! `inspect`: full configuration and state of one container.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use libcontainer::container::{ContainerConfig, State};
use libcontainer::error::Result;

use super::{invalid, open_runtime};

#[derive(Parser, Debug)]
pub struct Inspect {
    /// json or yaml
    #[arg(long, default_value = "json")]
    pub format: String,

    /// Container id, name, or id prefix
    pub container: String,
}

#[derive(Serialize)]
struct InspectView {
    config: ContainerConfig,
    state: State,
}

pub fn inspect(args: Inspect, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;
    let mut container = store.resolve_container(&args.container)?;
    container.refresh_status()?;

    let view = InspectView {
        config: container.config.clone(),
        state: container.state.clone(),
    };

    match args.format.as_str() {
        "json" => {
            // round-trip through Value for sorted keys
            let value = serde_json::to_value(&view)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        "yaml" => {
            let yaml = serde_yaml::to_string(&view)
                .map_err(|err| invalid(format!("yaml encoding failed: {err}")))?;
            print!("{yaml}");
        }
        other => return Err(invalid(format!("unknown format {other:?}"))),
    }
    Ok(0)
}

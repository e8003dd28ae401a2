//! Logging setup. Level comes from `--log-level`, `MINI_DOCKER_LOG_LEVEL`
//! or `MINI_DOCKER_DEBUG`, in that order of precedence; output is plain
//! text on stderr so container stdio stays clean.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::Level;
use tracing_subscriber::prelude::*;

use libcontainer::utils::env_truthy;

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "warn";

fn detect_log_level(cli_level: Option<String>, debug_flag: bool) -> Result<Level> {
    let level = match cli_level
        .or_else(|| std::env::var("MINI_DOCKER_LOG_LEVEL").ok())
    {
        Some(level) => level,
        None if debug_flag || env_truthy("MINI_DOCKER_DEBUG") => "debug".to_owned(),
        None => DEFAULT_LOG_LEVEL.to_owned(),
    };

    match Level::from_str(&level) {
        Ok(level) => Ok(level),
        Err(_) => bail!("unknown log level: {level}"),
    }
}

pub fn init(debug_flag: bool, cli_level: Option<String>) -> Result<()> {
    let level = detect_log_level(cli_level, debug_flag).context("failed to parse log level")?;
    let filter = tracing_subscriber::filter::LevelFilter::from(level);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to init logger: {err}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cli_level_wins() {
        std::env::set_var("MINI_DOCKER_LOG_LEVEL", "error");
        let level = detect_log_level(Some("info".into()), true).unwrap();
        assert_eq!(level, Level::INFO);
        std::env::remove_var("MINI_DOCKER_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_debug_flag_raises_level() {
        std::env::remove_var("MINI_DOCKER_LOG_LEVEL");
        let level = detect_log_level(None, true).unwrap();
        assert_eq!(level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_unknown_level_is_rejected() {
        assert!(detect_log_level(Some("loud".into()), false).is_err());
    }
}

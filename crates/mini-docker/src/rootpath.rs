//! State-store root resolution.
//!
//! Priority: `--root`, `MINI_DOCKER_HOST`, then `/var/lib/mini-docker`
//! for root and `$XDG_DATA_HOME/mini-docker` (default
//! `~/.local/share/mini-docker`) for everyone else.

use std::fs;
use std::path::PathBuf;

use nix::unistd::geteuid;

pub fn determine(cli_root: Option<PathBuf>) -> std::io::Result<PathBuf> {
    let path = match cli_root {
        Some(path) => path,
        None => match std::env::var_os("MINI_DOCKER_HOST") {
            Some(host) => PathBuf::from(host),
            None => default_root()?,
        },
    };

    fs::create_dir_all(&path)?;
    path.canonicalize()
}

fn default_root() -> std::io::Result<PathBuf> {
    if geteuid().is_root() {
        return Ok(PathBuf::from("/var/lib/mini-docker"));
    }

    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        let xdg = PathBuf::from(xdg);
        if xdg.is_absolute() {
            return Ok(xdg.join("mini-docker"));
        }
    }

    match std::env::var_os("HOME") {
        Some(home) => Ok(PathBuf::from(home).join(".local/share/mini-docker")),
        None => Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cannot determine state root: neither XDG_DATA_HOME nor HOME is set",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cli_root_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let wanted = tmp.path().join("custom-root");
        std::env::set_var("MINI_DOCKER_HOST", tmp.path().join("ignored"));

        let root = determine(Some(wanted.clone())).unwrap();
        assert_eq!(root, wanted.canonicalize().unwrap());
        assert!(wanted.is_dir());

        std::env::remove_var("MINI_DOCKER_HOST");
    }

    #[test]
    #[serial]
    fn test_env_override() {
        let tmp = tempfile::tempdir().unwrap();
        let wanted = tmp.path().join("env-root");
        std::env::set_var("MINI_DOCKER_HOST", &wanted);

        let root = determine(None).unwrap();
        assert_eq!(root, wanted.canonicalize().unwrap());

        std::env::remove_var("MINI_DOCKER_HOST");
    }
}

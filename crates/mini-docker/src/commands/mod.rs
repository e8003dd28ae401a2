pub mod build;
pub mod cleanup;
pub mod exec;
pub mod images;
pub mod info;
pub mod inspect;
pub mod logs;
pub mod pod;
pub mod ps;
pub mod rm;
pub mod run;
pub mod run_oci;
pub mod stop;

use std::path::PathBuf;

use libcontainer::error::{Result, RuntimeError};
use libcontainer::runtime::Runtime;
use libcontainer::store::Store;

/// Builds the per-invocation context every verb starts from.
pub(crate) fn open_runtime(root: PathBuf, rootless: bool) -> Result<(Runtime, Store)> {
    let runtime = Runtime::new(root, rootless);
    let store = Store::new(runtime.root().to_owned())?;
    Ok((runtime, store))
}

/// Parses sizes like `512`, `64K`, `20M`, `1G` into bytes.
pub(crate) fn parse_memory_size(input: &str) -> std::result::Result<u64, String> {
    let input = input.trim();
    let (digits, multiplier) = match input.char_indices().last() {
        Some((index, suffix)) if suffix.is_ascii_alphabetic() => {
            let multiplier: u64 = match suffix.to_ascii_lowercase() {
                'k' => 1024,
                'm' => 1024 * 1024,
                'g' => 1024 * 1024 * 1024,
                _ => return Err(format!("unknown size suffix {suffix:?}")),
            };
            (&input[..index], multiplier)
        }
        _ => (input, 1),
    };

    digits
        .parse::<u64>()
        .map(|value| value * multiplier)
        .map_err(|_| format!("invalid size {input:?}"))
}

pub(crate) fn invalid(message: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidConfig(message.into())
}

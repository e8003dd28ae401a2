//! Small shared helpers.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Generates a fresh 12-hex-digit container id.
pub fn generate_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    (0..12)
        .map(|_| HEX[fastrand::usize(..HEX.len())] as char)
        .collect()
}

/// Serializes `value` as JSON with sorted keys and atomically replaces
/// `path` via a temp file + rename, so readers never observe a torn write.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    // round-trip through Value: the plain JSON map is a BTreeMap, which
    // sorts the keys on write
    let value = serde_json::to_value(value)?;
    let data = serde_json::to_vec_pretty(&value)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = parent.join(format!(
        ".{}.tmp{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));

    let mut file = File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

/// Recursively hard-links `src` into `dst`, copying when linking fails
/// (e.g. across filesystems). Symlinks are recreated, not followed.
pub fn hardlink_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            hardlink_copy(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else if fs::hard_link(entry.path(), &target).is_err() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Last `n` lines of a text file.
pub fn tail_lines(content: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}

/// Interprets common truthy spellings used by environment switches.
pub fn env_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => !matches!(value.as_str(), "" | "0" | "false" | "no" | "off"),
        Err(_) => false,
    }
}

/// `KEY=VALUE` validation for user-supplied environment entries.
pub fn parse_env_entry(entry: &str) -> Option<(String, String)> {
    let (key, value) = entry.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_owned(), value.to_owned()))
}

/// Resolves a path relative to a rootfs, keeping it inside the root.
pub fn join_rootfs(rootfs: &Path, inner: &Path) -> PathBuf {
    let relative = inner.strip_prefix("/").unwrap_or(inner);
    rootfs.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_atomic_write_sorts_keys() {
        #[derive(Serialize)]
        struct Sample {
            zulu: u32,
            alpha: u32,
        }

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.json");
        atomic_write_json(&path, &Sample { zulu: 1, alpha: 2 }).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let alpha_pos = content.find("alpha").unwrap();
        let zulu_pos = content.find("zulu").unwrap();
        assert!(alpha_pos < zulu_pos);

        // no temp file left behind
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_tail_lines() {
        let content = "a\nb\nc\nd\n";
        assert_eq!(tail_lines(content, 2), vec!["c", "d"]);
        assert_eq!(tail_lines(content, 10).len(), 4);
    }

    #[test]
    fn test_parse_env_entry() {
        assert_eq!(
            parse_env_entry("FOO=bar"),
            Some(("FOO".into(), "bar".into()))
        );
        assert_eq!(parse_env_entry("FOO="), Some(("FOO".into(), "".into())));
        assert_eq!(parse_env_entry("=bar"), None);
        assert_eq!(parse_env_entry("FOO"), None);
    }

    #[test]
    fn test_join_rootfs() {
        assert_eq!(
            join_rootfs(Path::new("/merged"), Path::new("/etc/hosts")),
            PathBuf::from("/merged/etc/hosts")
        );
        assert_eq!(
            join_rootfs(Path::new("/merged"), Path::new("data")),
            PathBuf::from("/merged/data")
        );
    }

    #[test]
    fn test_hardlink_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("file"), "data").unwrap();
        fs::write(src.join("sub/nested"), "more").unwrap();

        let dst = tmp.path().join("dst");
        hardlink_copy(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("file")).unwrap(), "data");
        assert_eq!(fs::read_to_string(dst.join("sub/nested")).unwrap(), "more");
    }
}

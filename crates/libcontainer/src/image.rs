//! The image registry: a `name:tag` → rootfs directory mapping stored as
//! one JSON document per image. Images are immutable once registered.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::utils;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("no such image: {0}")]
    NotFound(String),
    #[error("image {0} is referenced by container {1}")]
    InUse(String, String),
    #[error("failed to access image registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse image metadata: {0}")]
    Parse(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, ImageError>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Image {
    pub name: String,
    pub tag: String,
    /// Absolute path of the image rootfs directory.
    pub rootfs: PathBuf,
    pub default_cmd: Vec<String>,
    pub default_env: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Image {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Splits `name[:tag]`, defaulting the tag to `latest`.
pub fn parse_reference(reference: &str) -> (String, String) {
    match reference.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.contains('/') => {
            (name.to_owned(), tag.to_owned())
        }
        _ => (reference.to_owned(), "latest".to_owned()),
    }
}

fn metadata_file(name: &str, tag: &str) -> String {
    let sanitized: String = format!("{name}_{tag}")
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect();
    format!("{sanitized}.json")
}

fn metadata_path(store: &Store, name: &str, tag: &str) -> PathBuf {
    store.images_dir().join(metadata_file(name, tag))
}

pub fn register(store: &Store, image: &Image) -> Result<()> {
    let path = metadata_path(store, &image.name, &image.tag);
    utils::atomic_write_json(&path, image)?;
    tracing::info!(reference = %image.reference(), rootfs = ?image.rootfs, "registered image");
    Ok(())
}

pub fn lookup(store: &Store, reference: &str) -> Result<Image> {
    let (name, tag) = parse_reference(reference);
    let path = metadata_path(store, &name, &tag);
    let content =
        fs::read_to_string(&path).map_err(|_| ImageError::NotFound(reference.to_owned()))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn list(store: &Store) -> Result<Vec<Image>> {
    let mut images = vec![];
    for entry in fs::read_dir(store.images_dir())? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match fs::read_to_string(&path)
            .map_err(ImageError::from)
            .and_then(|content| serde_json::from_str(&content).map_err(ImageError::from))
        {
            Ok(image) => images.push(image),
            Err(err) => tracing::warn!(?path, %err, "skipping unreadable image metadata"),
        }
    }
    images.sort_by(|a: &Image, b: &Image| a.reference().cmp(&b.reference()));
    Ok(images)
}

/// Unregisters a tag. Refuses while a live container still uses the
/// image rootfs. The rootfs directory itself is removed only when it
/// lives inside the registry (i.e. was produced by `build`).
pub fn remove(store: &Store, reference: &str) -> Result<()> {
    let image = lookup(store, reference)?;

    if let Ok(containers) = store.list_containers() {
        for container in containers {
            if container.status().is_live() && container.config.image_root == image.rootfs {
                return Err(ImageError::InUse(
                    reference.to_owned(),
                    container.id().to_owned(),
                ));
            }
        }
    }

    fs::remove_file(metadata_path(store, &image.name, &image.tag))?;
    if image.rootfs.starts_with(store.images_dir()) && image.rootfs.exists() {
        fs::remove_dir_all(&image.rootfs)?;
    }
    Ok(())
}

/// Directory a built image's rootfs is placed in.
pub fn build_rootfs_dir(store: &Store, name: &str, tag: &str) -> PathBuf {
    let stem = metadata_file(name, tag);
    let stem = stem.trim_end_matches(".json");
    store.images_dir().join(stem)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn store() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().to_owned()).unwrap();
        (tmp, store)
    }

    fn sample(name: &str, tag: &str, rootfs: &Path) -> Image {
        Image {
            name: name.into(),
            tag: tag.into(),
            rootfs: rootfs.to_owned(),
            default_cmd: vec!["/bin/sh".into()],
            default_env: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("alpine"), ("alpine".into(), "latest".into()));
        assert_eq!(parse_reference("alpine:3.19"), ("alpine".into(), "3.19".into()));
        assert_eq!(
            parse_reference("my/app:v1"),
            ("my/app".into(), "v1".into())
        );
    }

    #[test]
    fn test_register_lookup_round_trip() {
        let (tmp, store) = store();
        let image = sample("base", "latest", &tmp.path().join("rootfs"));
        register(&store, &image).unwrap();

        let found = lookup(&store, "base").unwrap();
        assert_eq!(found.reference(), "base:latest");
        assert_eq!(found.default_cmd, vec!["/bin/sh"]);

        assert!(matches!(
            lookup(&store, "missing"),
            Err(ImageError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_sorted() {
        let (tmp, store) = store();
        register(&store, &sample("zeta", "latest", tmp.path())).unwrap();
        register(&store, &sample("alpha", "latest", tmp.path())).unwrap();

        let images = list(&store).unwrap();
        let refs: Vec<String> = images.iter().map(Image::reference).collect();
        assert_eq!(refs, vec!["alpha:latest", "zeta:latest"]);
    }

    #[test]
    fn test_remove_unregisters() {
        let (tmp, store) = store();
        register(&store, &sample("base", "latest", tmp.path())).unwrap();
        remove(&store, "base").unwrap();
        assert!(matches!(
            lookup(&store, "base"),
            Err(ImageError::NotFound(_))
        ));
    }
}

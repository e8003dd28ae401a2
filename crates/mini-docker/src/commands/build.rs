//! `build`: execute an Imagefile and register the result.
//!
//! `FROM` seeds a working rootfs by hard-linking the base tree; `RUN`
//! steps execute chrooted into it so their writes land in the image.
//! Successful builds are cached by a digest over the instruction list.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use clap::Parser;

use libcontainer::error::{Result, RuntimeError};
use libcontainer::image::{self, Image};
use libcontainer::store::Store;
use libcontainer::utils;

use crate::imagefile::{self, Instruction};

use super::{invalid, open_runtime};

const DIGEST_FILE: &str = ".build_digest";

#[derive(Parser, Debug)]
pub struct Build {
    /// Tag for the built image, name[:tag]
    #[arg(short = 't', long = "tag", required = true)]
    pub tag: String,

    /// Imagefile to build from
    #[arg(short = 'f', long = "file", default_value = "Imagefile")]
    pub file: PathBuf,

    /// Rebuild even when the instruction digest matches
    #[arg(long)]
    pub no_cache: bool,

    /// Build context directory
    #[arg(default_value = ".")]
    pub context: PathBuf,
}

pub fn build(args: Build, root: PathBuf) -> Result<i32> {
    let (runtime, store) = open_runtime(root, false)?;

    if runtime.profile().rootless {
        return Err(RuntimeError::StateConflict(
            "build requires privileged mode (RUN steps chroot into the image)".into(),
        ));
    }

    let context = args
        .context
        .canonicalize()
        .map_err(|err| invalid(format!("bad build context: {err}")))?;
    let file = if args.file.is_absolute() {
        args.file.clone()
    } else {
        context.join(&args.file)
    };
    let content = fs::read_to_string(&file)
        .map_err(|err| invalid(format!("cannot read {}: {err}", file.display())))?;
    let instructions =
        imagefile::parse(&content).map_err(|err| invalid(format!("{}: {err}", file.display())))?;

    let (name, tag) = image::parse_reference(&args.tag);
    let target = image::build_rootfs_dir(&store, &name, &tag);
    let digest = digest_of(&instructions);

    if !args.no_cache && cached_digest(&target) == Some(digest) && image::lookup(&store, &args.tag).is_ok() {
        tracing::info!(reference = %args.tag, "build cache hit");
        println!("{name}:{tag}");
        return Ok(0);
    }

    if target.exists() {
        fs::remove_dir_all(&target)?;
    }

    let mut env: Vec<String> = vec![];
    let mut workdir: Option<PathBuf> = None;
    let mut cmd: Vec<String> = vec![];
    let mut entrypoint: Vec<String> = vec![];

    let total = instructions.len();
    for (step, instruction) in instructions.iter().enumerate() {
        println!("step {}/{}: {:?}", step + 1, total, instruction);
        match instruction {
            Instruction::From(base) => {
                let base = resolve_base(&store, &context, base)?;
                utils::hardlink_copy(&base, &target)?;
            }
            Instruction::Env(key, value) => env.push(format!("{key}={value}")),
            Instruction::Workdir(dir) => {
                fs::create_dir_all(utils::join_rootfs(&target, dir))?;
                workdir = Some(dir.clone());
            }
            Instruction::Copy(src, dst) => copy_into_rootfs(&context, &target, src, dst)?,
            Instruction::Run(shell_cmd) => {
                run_step(&target, shell_cmd, &env, workdir.as_deref())?
            }
            Instruction::Cmd(argv) => cmd = argv.clone(),
            Instruction::Entrypoint(argv) => entrypoint = argv.clone(),
        }
    }

    let mut default_cmd = entrypoint;
    default_cmd.extend(cmd);

    fs::write(target.join(DIGEST_FILE), format!("{digest:016x}"))?;
    image::register(
        &store,
        &Image {
            name: name.clone(),
            tag: tag.clone(),
            rootfs: target,
            default_cmd,
            default_env: env,
            created_at: Utc::now(),
        },
    )?;

    println!("{name}:{tag}");
    Ok(0)
}

fn digest_of(instructions: &[Instruction]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for instruction in instructions {
        format!("{instruction:?}").hash(&mut hasher);
    }
    hasher.finish()
}

fn cached_digest(target: &Path) -> Option<u64> {
    let content = fs::read_to_string(target.join(DIGEST_FILE)).ok()?;
    u64::from_str_radix(content.trim(), 16).ok()
}

/// `FROM` accepts a rootfs directory or a registered image reference.
fn resolve_base(store: &Store, context: &Path, base: &Path) -> Result<PathBuf> {
    let candidate = if base.is_absolute() {
        base.to_owned()
    } else {
        context.join(base)
    };
    if candidate.is_dir() {
        return Ok(candidate);
    }

    if let Some(reference) = base.to_str() {
        if let Ok(image) = image::lookup(store, reference) {
            return Ok(image.rootfs);
        }
    }

    Err(invalid(format!(
        "FROM {}: not a directory or registered image",
        base.display()
    )))
}

fn copy_into_rootfs(context: &Path, rootfs: &Path, src: &Path, dst: &Path) -> Result<()> {
    let source = if src.is_absolute() {
        src.to_owned()
    } else {
        context.join(src)
    };
    if !source.exists() {
        return Err(invalid(format!("COPY source {} missing", source.display())));
    }

    let target = utils::join_rootfs(rootfs, dst);
    if source.is_dir() {
        utils::hardlink_copy(&source, &target)?;
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &target)?;
    }
    Ok(())
}

fn run_step(
    rootfs: &Path,
    shell_cmd: &str,
    env: &[String],
    workdir: Option<&Path>,
) -> Result<()> {
    let rootfs = rootfs.to_owned();
    let chdir_to = workdir.map(Path::to_owned).unwrap_or_else(|| PathBuf::from("/"));

    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(shell_cmd).env_clear();
    for entry in env {
        if let Some((key, value)) = utils::parse_env_entry(entry) {
            command.env(key, value);
        }
    }
    command.env(
        "PATH",
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
    );

    unsafe {
        command.pre_exec(move || {
            nix::unistd::chroot(&rootfs).map_err(std::io::Error::from)?;
            nix::unistd::chdir(&chdir_to).map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    let status = command
        .status()
        .map_err(|err| RuntimeError::Other(format!("failed to spawn RUN step: {err}")))?;
    if !status.success() {
        return Err(RuntimeError::Other(format!(
            "RUN {shell_cmd:?} failed with {status}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_order_sensitive() {
        let a = vec![
            Instruction::From(PathBuf::from("/base")),
            Instruction::Env("A".into(), "1".into()),
        ];
        let b = vec![
            Instruction::Env("A".into(), "1".into()),
            Instruction::From(PathBuf::from("/base")),
        ];
        assert_eq!(digest_of(&a), digest_of(&a));
        assert_ne!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn test_copy_into_rootfs_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let context = tmp.path().join("ctx");
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(&context).unwrap();
        fs::create_dir_all(&rootfs).unwrap();
        fs::write(context.join("app.sh"), "#!/bin/sh\n").unwrap();

        copy_into_rootfs(
            &context,
            &rootfs,
            Path::new("app.sh"),
            Path::new("/usr/local/bin/app.sh"),
        )
        .unwrap();

        assert!(rootfs.join("usr/local/bin/app.sh").is_file());
    }

    #[test]
    fn test_missing_copy_source_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = copy_into_rootfs(
            tmp.path(),
            tmp.path(),
            Path::new("nope"),
            Path::new("/x"),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig(_)));
    }
}

//! `images` and `rmi`: the image registry surface.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use clap::Parser;
use tabwriter::TabWriter;

use libcontainer::error::Result;
use libcontainer::image;

use super::open_runtime;

#[derive(Parser, Debug)]
pub struct Images {}

#[derive(Parser, Debug)]
pub struct Rmi {
    /// Image references, name[:tag]
    #[arg(required = true)]
    pub images: Vec<String>,
}

pub fn images(_args: Images, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;

    let mut tab_writer = TabWriter::new(std::io::stdout());
    writeln!(&mut tab_writer, "REPOSITORY\tTAG\tPATH\tCREATED")?;
    for image in image::list(&store)? {
        let created: DateTime<Local> = DateTime::from(image.created_at);
        writeln!(
            &mut tab_writer,
            "{}\t{}\t{}\t{}",
            image.name,
            image.tag,
            image.rootfs.display(),
            created.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
        )?;
    }
    tab_writer.flush()?;
    Ok(0)
}

pub fn rmi(args: Rmi, root: PathBuf) -> Result<i32> {
    let (_runtime, store) = open_runtime(root, false)?;

    for reference in &args.images {
        image::remove(&store, reference)?;
        println!("{reference}");
    }
    Ok(0)
}

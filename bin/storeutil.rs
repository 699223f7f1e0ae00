use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use squidstore::store::codec_util;
use squidstore::store::file_names::entries_file_name;
use squidstore::{CompoundFileDirectory, Directory, FsDirectory, IoContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "storeutil")]
#[command(about = "Inspect and build compound archives in a store directory", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the entries of a sealed compound archive
    List {
        /// Directory holding the archive
        #[arg(env = "STOREUTIL_DIR")]
        dir: PathBuf,
        /// Archive file name, e.g. _0.cfs
        archive: String,
    },
    /// Copy one entry of an archive out to a filesystem path
    Extract {
        #[arg(env = "STOREUTIL_DIR")]
        dir: PathBuf,
        archive: String,
        entry: String,
        dest: PathBuf,
    },
    /// Pack existing files of the directory into a new archive
    Pack {
        #[arg(env = "STOREUTIL_DIR")]
        dir: PathBuf,
        archive: String,
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Validate the codec footer checksum of a file
    Verify {
        #[arg(env = "STOREUTIL_DIR")]
        dir: PathBuf,
        file: String,
    },
}

fn open_dir(path: &Path) -> Result<Arc<dyn Directory>> {
    let dir = FsDirectory::open(path)
        .with_context(|| format!("cannot open directory {}", path.display()))?;
    Ok(Arc::new(dir))
}

fn list(dir: &Path, archive: &str) -> Result<()> {
    let cfs = CompoundFileDirectory::open(open_dir(dir)?, archive, &IoContext::READ)?;
    let mut names = cfs.list_all()?;
    names.sort();
    for name in &names {
        println!("{:>12}  {}", cfs.file_length(name)?, name);
    }
    info!(archive, entries = names.len(), "listed archive");
    cfs.close()?;
    Ok(())
}

fn extract(dir: &Path, archive: &str, entry: &str, dest: &Path) -> Result<()> {
    let file_name = match dest.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => bail!("destination {} has no file name", dest.display()),
    };
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("cannot create {}", parent.display()))?;

    let cfs = CompoundFileDirectory::open(open_dir(dir)?, archive, &IoContext::READ_ONCE)?;
    let target = open_dir(&parent)?;
    cfs.copy_to(&*target, entry, &file_name, &IoContext::READ_ONCE)
        .with_context(|| format!("cannot extract {} from {}", entry, archive))?;
    target.sync(&[file_name.clone()])?;
    info!(archive, entry, dest = %dest.display(), "extracted entry");
    cfs.close()?;
    Ok(())
}

fn pack(dir: &Path, archive: &str, files: &[String]) -> Result<()> {
    let directory = open_dir(dir)?;
    let cfs = CompoundFileDirectory::create(Arc::clone(&directory), archive)?;
    for file in files {
        directory
            .copy_to(&cfs, file, file, &IoContext::DEFAULT)
            .with_context(|| format!("cannot pack {}", file))?;
    }
    cfs.close()?;
    directory.sync(&[archive.to_string(), entries_file_name(archive)])?;
    info!(archive, files = files.len(), "packed archive");
    Ok(())
}

fn verify(dir: &Path, file: &str) -> Result<()> {
    let directory = open_dir(dir)?;
    let input = directory.open_input(file, &IoContext::READ_ONCE)?;
    let checksum = codec_util::checksum_entire_file(input)
        .with_context(|| format!("{} failed verification", file))?;
    println!("{}: ok (checksum {:08x})", file, checksum);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::List { dir, archive } => list(&dir, &archive),
        Command::Extract {
            dir,
            archive,
            entry,
            dest,
        } => extract(&dir, &archive, &entry, &dest),
        Command::Pack {
            dir,
            archive,
            files,
        } => pack(&dir, &archive, &files),
        Command::Verify { dir, file } => verify(&dir, &file),
    }
}

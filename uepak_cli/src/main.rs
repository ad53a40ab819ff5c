use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use path_clean::PathClean;
use rayon::prelude::*;
use strum::VariantNames;

use uepak::{PakBuilder, Version};

#[derive(Debug, Clone)]
struct AesKey([u8; 32]);

impl std::str::FromStr for AesKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(AesKey(uepak::parse_key(s)?))
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Reader/writer for Unreal Engine .pak archives")]
struct Args {
    /// 256 bit AES key as hex (optionally 0x-prefixed) or base64, for encrypted archives
    #[arg(long, global = true)]
    aes: Option<AesKey>,

    /// Raise log verbosity to `debug` (default: `warn`)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print version, mount point, entry count and encryption flags
    Info { input: PathBuf },
    /// Print every entry path, one per line
    List { input: PathBuf },
    /// Extract every entry to a directory, in parallel
    Unpack {
        input: PathBuf,
        /// Output directory; defaults to the input path without its extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Pack a directory into a new archive
    Pack {
        input: PathBuf,
        /// Output archive path; defaults to `<input>.pak`
        output: Option<PathBuf>,
        #[arg(long, default_value = "../../../")]
        mount_point: String,
        #[arg(
            long,
            default_value_t = Version::V11,
            value_parser = clap::builder::PossibleValuesParser::new(Version::VARIANTS)
                .map(|s| s.parse::<Version>().expect("clap already validated against VARIANTS"))
        )]
        version: Version,
        #[arg(long, default_value = "0")]
        path_hash_seed: u64,
    },
    /// Extract a single entry to a file on disk
    Extract {
        input: PathBuf,
        path: String,
        output: PathBuf,
    },
    /// Write a single entry's contents to standard output
    Read { input: PathBuf, path: String },
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Warn })
        .init();

    let aes_key = args.aes.map(|k| k.0);

    match args.action {
        Action::Info { input } => info(aes_key, &input),
        Action::List { input } => list(aes_key, &input),
        Action::Unpack { input, output } => unpack(aes_key, &input, output),
        Action::Pack { input, output, mount_point, version, path_hash_seed } => {
            pack(&input, output, mount_point, version, path_hash_seed)
        }
        Action::Extract { input, path, output } => extract(aes_key, &input, &path, &output),
        Action::Read { input, path } => read(aes_key, &input, &path),
    }
}

/// Defers loading the native Oodle library until an archive actually asks
/// to decompress an Oodle-tagged entry, per the core's lazy-load contract.
struct LazyOodle;

impl uepak::Oodle for LazyOodle {
    fn decompress(&self, input: &[u8], expected_size: usize) -> uepak::Result<Vec<u8>> {
        uepak_oodle::NativeOodle::load()?.decompress(input, expected_size)
    }

    fn compress(&self, input: &[u8], compressor_id: i32, level: i32) -> uepak::Result<Vec<u8>> {
        uepak_oodle::NativeOodle::load()?.compress(input, compressor_id, level)
    }
}

fn builder(aes_key: Option<[u8; 32]>) -> PakBuilder {
    let mut builder = PakBuilder::new().oodle(Arc::new(LazyOodle));
    if let Some(key) = aes_key {
        builder = builder.key(key);
    }
    builder
}

fn info(aes_key: Option<[u8; 32]>, input: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let pak = builder(aes_key).reader(&mut reader)?;
    println!("version: {}", pak.version());
    println!("mount point: {}", pak.mount_point());
    println!("encrypted: {}", pak.is_encrypted());
    println!("path hash seed: {:?}", pak.path_hash_seed());
    println!("{} file entries", pak.len());
    Ok(())
}

fn list(aes_key: Option<[u8; 32]>, input: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let pak = builder(aes_key).reader(&mut reader)?;
    for path in pak.list() {
        println!("{path}");
    }
    Ok(())
}

const PROGRESS_STYLE: &str = "[{elapsed_precise}] [{wide_bar}] {pos}/{len} ({eta})";

fn unpack(aes_key: Option<[u8; 32]>, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let (pak, mmap) = builder(aes_key).reader_mmap(input)?;
    let output = output.unwrap_or_else(|| input.with_extension(""));
    fs::create_dir_all(&output)?;

    let paths: Vec<&str> = pak.list().collect();
    let progress = indicatif::ProgressBar::new(paths.len() as u64)
        .with_style(indicatif::ProgressStyle::with_template(PROGRESS_STYLE).unwrap());

    paths.par_iter().try_for_each(|path| -> Result<()> {
        let out_path = output.join(path).clean();
        if !out_path.starts_with(&output) {
            bail!("entry {path} would write outside the output directory");
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cursor = std::io::Cursor::new(&mmap[..]);
        let data = pak.read_file(path, &mut cursor)?;
        fs::write(&out_path, data)?;
        progress.inc(1);
        Ok(())
    })?;
    progress.finish();

    println!("Unpacked {} files to {}", paths.len(), output.display());
    Ok(())
}

fn pack(
    input: &Path,
    output: Option<PathBuf>,
    mount_point: String,
    version: Version,
    path_hash_seed: u64,
) -> Result<()> {
    if !input.is_dir() {
        bail!("{} is not a directory", input.display());
    }
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.pak", input.display())));

    fn collect_files(paths: &mut Vec<PathBuf>, dir: &Path) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                collect_files(paths, &path)?;
            } else {
                paths.push(path);
            }
        }
        Ok(())
    }
    let mut paths = Vec::new();
    collect_files(&mut paths, input)?;
    paths.sort();

    let entries = paths.into_iter().map(|p| -> Result<(String, Vec<u8>)> {
        let rel = p.strip_prefix(input).expect("file not under input directory");
        let rel = rel.to_str().context("non-utf8 path")?.replace('\\', "/");
        Ok((rel, fs::read(&p)?))
    }).collect::<Result<Vec<_>>>()?;

    let count = entries.len();
    uepak::write_archive_to_path(&output, version, mount_point, Some(path_hash_seed), entries)?;

    println!("Packed {count} files to {}", output.display());
    Ok(())
}

fn extract(aes_key: Option<[u8; 32]>, input: &Path, path: &str, output: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let pak = builder(aes_key).reader(&mut reader)?;
    let data = pak.read_file(path, &mut reader)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, data)?;
    Ok(())
}

fn read(aes_key: Option<[u8; 32]>, input: &Path, path: &str) -> Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let pak = builder(aes_key).reader(&mut reader)?;
    let data = pak.read_file(path, &mut reader)?;
    std::io::stdout().write_all(&data)?;
    Ok(())
}

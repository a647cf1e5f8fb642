use crate::rewrite::Tool;
use crate::scan::{find_rewritten_files, CleanupGuard};
use color_eyre::eyre::{ensure, Context};
use color_eyre::Result;
use log::{debug, info};
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

/// Narrow collaborator interface for the external indexer binaries.
///
/// The core pipeline never builds shell command strings; collaborators are
/// invoked with explicit argument lists and judged by exit status only, so
/// the orchestration below is unit-testable without spawning any process.
pub trait ToolRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<()>;
}

/// Runs collaborators as real child processes.
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        debug!("Running {program} {}", args.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .wrap_err_with(|| format!("Failed to run {program}"))?;
        ensure!(status.success(), "{program} exited with {status}");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct KrakenBuildOpts {
    pub threads: usize,
    pub kmer_len: u32,
    pub minimizer_len: u32,
    pub max_db_size: Option<String>,
    pub jellyfish_hash_size: Option<String>,
}

/// Amino acid alphabet passed to mkbwt, as the kaiju database expects.
const KAIJU_ALPHABET: &str = "ACDEFGHIKLMNPQRSTVWY";

fn decompress_to(src: &Path, dst: &Path) -> Result<()> {
    let (mut reader, _) = niffler::from_path(src)
        .wrap_err_with(|| format!("Failed to open: {}", src.display()))?;
    let mut out = fs::File::create(dst)
        .wrap_err_with(|| format!("Failed to create: {}", dst.display()))?;
    io::copy(&mut reader, &mut out)
        .wrap_err_with(|| format!("Failed to decompress: {}", src.display()))?;
    Ok(())
}

/// Builds a kraken database from the rewritten genomic files.
///
/// Each `.kraken.fna.gz` file is decompressed to a scoped working copy,
/// added to the library via `kraken-build --add-to-library`, and the working
/// copy removed again on every exit path. The database is then built and
/// cleaned. Taxonomy files are expected to already be in place under
/// `<db_dir>/taxonomy` (see the filter-taxonomy pipeline).
pub fn build_kraken_db(
    runner: &dyn ToolRunner,
    download_dir: &Path,
    db_dir: &Path,
    subset: Option<&[String]>,
    opts: &KrakenBuildOpts,
) -> Result<usize> {
    fs::create_dir_all(db_dir)
        .wrap_err_with(|| format!("Failed to create database directory: {}", db_dir.display()))?;
    let db = db_dir.to_string_lossy().to_string();

    let files = find_rewritten_files(download_dir, Tool::Kraken, subset)?;
    info!("Adding {} genomic files to the kraken library", files.len());

    for path in &files {
        let working_copy = path.with_extension("");
        // guard precedes decompression so a failed decompress leaves no
        // partial copy; the compressed original stays authoritative
        let _guard = CleanupGuard::new(&working_copy);
        decompress_to(path, &working_copy)?;
        runner.run(
            "kraken-build",
            &[
                "--add-to-library".to_string(),
                working_copy.to_string_lossy().to_string(),
                "--db".to_string(),
                db.clone(),
            ],
        )?;
    }

    let mut build_args = vec![
        "--build".to_string(),
        "--threads".to_string(),
        opts.threads.to_string(),
        "--db".to_string(),
        db.clone(),
        "--kmer-len".to_string(),
        opts.kmer_len.to_string(),
        "--minimizer-len".to_string(),
        opts.minimizer_len.to_string(),
    ];
    if let Some(max_db_size) = &opts.max_db_size {
        build_args.push("--max-db-size".to_string());
        build_args.push(max_db_size.clone());
    }
    if let Some(jellyfish_hash_size) = &opts.jellyfish_hash_size {
        build_args.push("--jellyfish-hash-size".to_string());
        build_args.push(jellyfish_hash_size.clone());
    }
    runner.run("kraken-build", &build_args)?;

    runner.run(
        "kraken-build",
        &["--clean".to_string(), "--db".to_string(), db],
    )?;

    Ok(files.len())
}

/// Builds a kaiju FM-index from the aggregated library file: `mkbwt`
/// followed by `mkfmi`, then removal of the intermediate `.bwt`/`.sa` files.
/// Only the `.fmi` index survives.
pub fn build_kaiju_db(runner: &dyn ToolRunner, library: &Path, db_dir: &Path) -> Result<()> {
    fs::create_dir_all(db_dir)
        .wrap_err_with(|| format!("Failed to create database directory: {}", db_dir.display()))?;
    let index_base = db_dir.join("kaiju_library");
    let base = index_base.to_string_lossy().to_string();

    runner.run(
        "mkbwt",
        &[
            "-n".to_string(),
            "5".to_string(),
            "-a".to_string(),
            KAIJU_ALPHABET.to_string(),
            "-o".to_string(),
            base.clone(),
            library.to_string_lossy().to_string(),
        ],
    )?;
    runner.run("mkfmi", &[base])?;

    for ext in ["bwt", "sa"] {
        let intermediate = index_base.with_extension(ext);
        if intermediate.exists() {
            fs::remove_file(&intermediate).wrap_err_with(|| {
                format!("Failed to remove intermediate: {}", intermediate.display())
            })?;
        }
    }
    Ok(())
}

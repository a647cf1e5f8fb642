use crate::rewrite::Tool;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Prepare custom Kraken and Kaiju reference databases from NCBI genome downloads."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Print a JSON summary of the run to stdout
    #[arg(long, global = true)]
    pub summary: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rewrite sequence identifiers in downloaded genome/protein files
    Rename(RenameArgs),
    /// Concatenate rewritten protein files into a single kaiju library file
    Library(LibraryArgs),
    /// Prune the NCBI taxonomy dump to a set of taxids and their ancestors
    FilterTaxonomy(FilterTaxonomyArgs),
    /// Build a kraken database from the rewritten genomic files
    BuildKraken(BuildKrakenArgs),
    /// Build a kaiju FM-index from an aggregated library file
    BuildKaiju(BuildKaijuArgs),
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Classifier format to rewrite headers into
    #[arg(short, long, value_enum)]
    pub tool: Tool,
    /// Directory tree of downloaded genome/protein files
    #[arg(short = 'd', long)]
    pub download_dir: PathBuf,
    /// Path to the NCBI assembly_summary table
    #[arg(short = 'a', long)]
    pub assembly_summary: PathBuf,
    /// Taxid override for a file under extra/, as FILENAME=TAXID (repeatable)
    #[arg(long = "extra", value_parser = parse_extra_override)]
    pub extra: Vec<(String, u32)>,
    #[arg(long, default_value = "6", value_parser = parse_compression_level)]
    pub compression_level: niffler::Level,
}

#[derive(Args, Debug)]
pub struct LibraryArgs {
    /// Directory tree holding rewritten .kaiju.faa.gz files
    #[arg(short = 'd', long)]
    pub download_dir: PathBuf,
    /// Path of the flat library file to create
    #[arg(short, long)]
    pub output: PathBuf,
    /// Restrict aggregation to these assembly directory names (repeatable)
    #[arg(long = "subset")]
    pub subset: Vec<String>,
}

#[derive(Args, Debug)]
pub struct FilterTaxonomyArgs {
    /// NCBI taxonomy identifiers, space separated. Non-integer tokens are
    /// ignored; at least one valid id is required.
    #[arg(required = true, num_args(1..))]
    pub taxids: Vec<String>,
    /// Directory holding the full taxonomy dump files
    #[arg(short, long)]
    pub source_dir: PathBuf,
    /// Directory to write the pruned dump files into
    #[arg(short, long, default_value = ".")]
    pub out_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct BuildKrakenArgs {
    /// Directory tree holding rewritten .kraken.fna.gz files
    #[arg(short = 'd', long)]
    pub download_dir: PathBuf,
    /// Kraken database directory
    #[arg(long)]
    pub db: PathBuf,
    #[arg(long, default_value_t = 1)]
    pub threads: usize,
    #[arg(long, default_value_t = 31)]
    pub kmer_len: u32,
    #[arg(long, default_value_t = 15)]
    pub minimizer_len: u32,
    /// Cap the database build at this size (GB), passed to kraken-build
    #[arg(long)]
    pub max_db_size: Option<String>,
    /// Initial jellyfish hash size, passed to kraken-build
    #[arg(long)]
    pub jellyfish_hash_size: Option<String>,
    /// Restrict the build to these assembly directory names (repeatable)
    #[arg(long = "subset")]
    pub subset: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BuildKaijuArgs {
    /// Aggregated library file produced by the library subcommand
    #[arg(short, long)]
    pub library: PathBuf,
    /// Kaiju database directory
    #[arg(long)]
    pub db: PathBuf,
}

fn parse_extra_override(value: &str) -> Result<(String, u32), String> {
    let (filename, taxid) = value
        .split_once('=')
        .ok_or_else(|| format!("expected FILENAME=TAXID, got '{value}'"))?;
    let taxid = taxid
        .parse::<u32>()
        .map_err(|_| format!("invalid taxid in '{value}'"))?;
    if filename.is_empty() {
        return Err(format!("empty filename in '{value}'"));
    }
    Ok((filename.to_string(), taxid))
}

fn parse_compression_level(value: &str) -> Result<niffler::Level, String> {
    match value {
        "1" => Ok(niffler::Level::One),
        "2" => Ok(niffler::Level::Two),
        "3" => Ok(niffler::Level::Three),
        "4" => Ok(niffler::Level::Four),
        "5" => Ok(niffler::Level::Five),
        "6" => Ok(niffler::Level::Six),
        "7" => Ok(niffler::Level::Seven),
        "8" => Ok(niffler::Level::Eight),
        "9" => Ok(niffler::Level::Nine),
        _ => Err(format!("compression level must be 1-9, got '{value}'")),
    }
}

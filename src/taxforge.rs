use crate::cli::{
    BuildKaijuArgs, BuildKrakenArgs, Cli, Command, FilterTaxonomyArgs, LibraryArgs, RenameArgs,
};
use crate::errors::TaxforgeError;
use crate::external::{build_kaiju_db, build_kraken_db, KrakenBuildOpts, ProcessRunner};
use crate::library::{build_library, LibraryStats};
use crate::parsers::assembly::AssemblySummary;
use crate::parsers::taxonomy::{filter_taxonomy, FilterStats};
use crate::rewrite::SequenceCounter;
use crate::scan::{rename_genome_files, ScanStats};
use color_eyre::Result;
use fxhash::FxHashMap;
use log::info;
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
struct Summary {
    command: &'static str,
    stats: serde_json::Value,
    taxforge_version: String,
}

pub struct Taxforge {
    args: Cli,
    summary: Option<Summary>,
}

impl Taxforge {
    pub fn new(args: Cli) -> Self {
        Self {
            args,
            summary: None,
        }
    }

    fn rename(args: &RenameArgs) -> Result<ScanStats> {
        info!("Loading assembly summary");
        let summary = AssemblySummary::from_path(&args.assembly_summary)?;
        let extra: FxHashMap<String, u32> = args.extra.iter().cloned().collect();
        let mut counter = SequenceCounter::new();
        info!(
            "Rewriting headers to {} format under {}",
            args.tool.name(),
            args.download_dir.display()
        );
        rename_genome_files(
            &args.download_dir,
            args.tool,
            &summary,
            &extra,
            &mut counter,
            args.compression_level,
        )
    }

    fn library(args: &LibraryArgs) -> Result<LibraryStats> {
        let subset = (!args.subset.is_empty()).then_some(args.subset.as_slice());
        let mut counter = SequenceCounter::new();
        build_library(&args.download_dir, &args.output, subset, &mut counter)
    }

    fn filter_taxonomy(args: &FilterTaxonomyArgs) -> Result<FilterStats> {
        let wanted = parse_wanted_taxids(&args.taxids)?;
        info!(
            "Filtering taxonomy dumps in {} for {} taxids",
            args.source_dir.display(),
            wanted.len()
        );
        filter_taxonomy(&args.source_dir, &args.out_dir, &wanted)
    }

    fn build_kraken(args: &BuildKrakenArgs) -> Result<usize> {
        let subset = (!args.subset.is_empty()).then_some(args.subset.as_slice());
        let opts = KrakenBuildOpts {
            threads: args.threads,
            kmer_len: args.kmer_len,
            minimizer_len: args.minimizer_len,
            max_db_size: args.max_db_size.clone(),
            jellyfish_hash_size: args.jellyfish_hash_size.clone(),
        };
        build_kraken_db(&ProcessRunner, &args.download_dir, &args.db, subset, &opts)
    }

    fn build_kaiju(args: &BuildKaijuArgs) -> Result<()> {
        build_kaiju_db(&ProcessRunner, &args.library, &args.db)
    }

    fn output_summary(&self) -> Result<()> {
        if let Some(summary) = &self.summary {
            if self.args.summary {
                let json = serde_json::to_string_pretty(summary)?;
                println!("{}", json);
            }
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<()> {
        info!(
            "Starting taxforge at {}",
            chrono::Local::now().format("%H:%M:%S")
        );

        let (command, stats) = match &self.args.command {
            Command::Rename(args) => ("rename", serde_json::to_value(Self::rename(args)?)?),
            Command::Library(args) => ("library", serde_json::to_value(Self::library(args)?)?),
            Command::FilterTaxonomy(args) => (
                "filter-taxonomy",
                serde_json::to_value(Self::filter_taxonomy(args)?)?,
            ),
            Command::BuildKraken(args) => {
                let files_added = Self::build_kraken(args)?;
                ("build-kraken", json!({ "files_added": files_added }))
            }
            Command::BuildKaiju(args) => {
                Self::build_kaiju(args)?;
                ("build-kaiju", json!({}))
            }
        };
        self.summary = Some(Summary {
            command,
            stats,
            taxforge_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        info!("Complete at {}", chrono::Local::now().format("%H:%M:%S"));
        self.output_summary()?;
        Ok(())
    }
}

/// Parses the positional taxid tokens for filter-taxonomy. Non-integer
/// tokens are silently dropped; an empty result is a fatal error, including
/// the case where every supplied token failed to parse.
fn parse_wanted_taxids(tokens: &[String]) -> Result<Vec<u32>> {
    let mut wanted: Vec<u32> = tokens
        .iter()
        .filter_map(|token| token.parse::<u32>().ok())
        .collect();
    wanted.sort_unstable();
    wanted.dedup();
    if wanted.is_empty() {
        return Err(TaxforgeError::NoTaxidsSupplied.into());
    }
    Ok(wanted)
}

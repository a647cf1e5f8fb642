use crate::errors::TaxforgeError;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use fxhash::{FxHashMap, FxHashSet};
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// taxid -> parent taxid, for the whole nodes dump. Roots point at
/// themselves.
pub type ParentMap = FxHashMap<u32, u32>;

/// Auxiliary dump files filtered against the ancestor closure. delnodes.dmp
/// is handled separately (always emitted empty).
pub const DUMP_FILES: [&str; 6] = [
    "citations.dmp",
    "division.dmp",
    "gencode.dmp",
    "merged.dmp",
    "names.dmp",
    "nodes.dmp",
];

/// Record delimiter used by all NCBI taxonomy dump files.
const DUMP_DELIMITER: &str = "\t|\t";

#[derive(Debug, Serialize)]
pub struct FilterStats {
    pub taxids_wanted: usize,
    pub closure_size: usize,
    pub lines_retained: usize,
}

/// Parses a nodes dump into a parent-pointer map.
///
/// Each line's first two `\t|\t`-delimited fields are taxid and parent
/// taxid; remaining fields (rank, division, ...) are ignored.
pub fn parse_nodes_dump(path: &Path) -> Result<ParentMap> {
    let file = fs::File::open(path)
        .wrap_err_with(|| format!("Failed to open nodes dump: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tree = ParentMap::default();
    for line_result in reader.lines() {
        let line = line_result.wrap_err("Error reading nodes dump line")?;
        let mut fields = line.split(DUMP_DELIMITER);
        let taxid_field = fields
            .next()
            .ok_or_else(|| eyre!("Missing taxid field in nodes dump line"))?;
        let parent_field = fields
            .next()
            .ok_or_else(|| eyre!("Missing parent taxid field in nodes dump line"))?;
        let taxid = taxid_field
            .trim()
            .parse::<u32>()
            .wrap_err_with(|| format!("Error parsing taxid: '{taxid_field}'"))?;
        let parent = parent_field
            .trim()
            .parse::<u32>()
            .wrap_err_with(|| format!("Error parsing parent taxid: '{parent_field}'"))?;
        tree.insert(taxid, parent);
    }

    info!("Loaded {} entries from {}", tree.len(), path.display());
    Ok(tree)
}

/// Expands a wanted set of taxids to include every ancestor up to the root.
///
/// Each chain is walked until a root (parent == self, included) or an id
/// already in the closure is reached. The short-circuit means each ancestor
/// chain is walked at most once in total, bounding the work by the number of
/// distinct edges rather than wanted-count times tree depth, and makes the
/// walk safe against cycles in a malformed dump.
///
/// # Arguments
///
/// * `tree` - Parent-pointer map built by [`parse_nodes_dump`].
/// * `wanted` - The seed taxids. Must be non-empty; every id must exist in
///   the tree.
pub fn ancestor_closure(tree: &ParentMap, wanted: &[u32]) -> Result<FxHashSet<u32>> {
    if wanted.is_empty() {
        return Err(TaxforgeError::NoTaxidsSupplied.into());
    }

    let mut include = FxHashSet::default();
    for &taxid in wanted {
        include.insert(taxid);
        let mut current = taxid;
        loop {
            let parent = *tree
                .get(&current)
                .ok_or_else(|| eyre!("Taxid {current} not present in the nodes dump"))?;
            if parent == current {
                // Reached a root
                break;
            }
            if include.contains(&parent) {
                // Rest of this chain is already in the closure
                break;
            }
            include.insert(parent);
            current = parent;
        }
    }

    debug!(
        "Expanded {} wanted taxids to a closure of {} including ancestors",
        wanted.len(),
        include.len()
    );
    Ok(include)
}

/// Streams one dump file, retaining only lines whose leading taxid is in the
/// closure.
///
/// Lines are treated as opaque byte sequences except for the leading
/// delimited taxid field, and retained lines are written byte-identically in
/// their original order. citations.dmp carries latin-1 text, so nothing here
/// may assume UTF-8.
///
/// # Returns
///
/// The number of lines retained.
pub fn filter_dump_file(src: &Path, dst: &Path, include: &FxHashSet<u32>) -> Result<usize> {
    let file = fs::File::open(src)
        .wrap_err_with(|| format!("Failed to open taxonomy dump: {}", src.display()))?;
    let mut reader = BufReader::new(file);
    let out = fs::File::create(dst)
        .wrap_err_with(|| format!("Failed to create output file: {}", dst.display()))?;
    let mut writer = BufWriter::new(out);

    let mut retained = 0;
    let mut line: Vec<u8> = Vec::new();
    loop {
        line.clear();
        let bytes_read = reader
            .read_until(b'\n', &mut line)
            .wrap_err_with(|| format!("Error reading dump line from {}", src.display()))?;
        if bytes_read == 0 {
            break;
        }
        if include.contains(&leading_taxid(&line, src)?) {
            writer
                .write_all(&line)
                .wrap_err_with(|| format!("Error writing to {}", dst.display()))?;
            retained += 1;
        }
    }

    writer.flush().wrap_err("Error flushing filtered dump")?;
    Ok(retained)
}

/// Parses the leading tab-delimited taxid field of a raw dump line. Every
/// malformed leading field is fatal, blank included.
fn leading_taxid(line: &[u8], src: &Path) -> Result<u32> {
    let end = line.iter().position(|&b| b == b'\t').unwrap_or(line.len());
    let field: &[u8] = &line[..end];
    let text = std::str::from_utf8(field)
        .wrap_err_with(|| format!("Non-numeric leading field in {}", src.display()))?;
    let text = text.trim();
    text.parse::<u32>()
        .wrap_err_with(|| format!("Error parsing leading taxid '{text}' in {}", src.display()))
}

/// Prunes a full taxonomy dump directory down to the wanted taxids and their
/// ancestors.
///
/// Reads `nodes.dmp` from `source_dir`, computes the ancestor closure of
/// `wanted`, then filters each auxiliary dump file into `out_dir`.
/// `delnodes.dmp` is always written zero-length: no deleted-node filtering
/// logic exists, and downstream indexers accept the empty file.
pub fn filter_taxonomy(source_dir: &Path, out_dir: &Path, wanted: &[u32]) -> Result<FilterStats> {
    if wanted.is_empty() {
        return Err(TaxforgeError::NoTaxidsSupplied.into());
    }

    let tree = parse_nodes_dump(&source_dir.join("nodes.dmp"))?;
    let include = ancestor_closure(&tree, wanted)?;
    info!(
        "Expanded {} wanted taxids to {} including ancestors",
        wanted.len(),
        include.len()
    );

    fs::create_dir_all(out_dir)
        .wrap_err_with(|| format!("Failed to create output directory: {}", out_dir.display()))?;
    fs::File::create(out_dir.join("delnodes.dmp"))
        .wrap_err("Failed to create empty delnodes.dmp")?;

    let mut lines_retained = 0;
    for name in DUMP_FILES {
        info!("Filtering {name}");
        let retained = filter_dump_file(&source_dir.join(name), &out_dir.join(name), &include)?;
        debug!("Retained {retained} lines from {name}");
        lines_retained += retained;
    }

    Ok(FilterStats {
        taxids_wanted: wanted.len(),
        closure_size: include.len(),
        lines_retained,
    })
}

use crate::errors::TaxforgeError;
use crate::parsers::assembly::AssemblySummary;
use crate::rewrite::{rewrite_records, SequenceCounter, Tool};
use color_eyre::eyre::Context;
use color_eyre::Result;
use fxhash::FxHashMap;
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files under a directory with this name are resolved via the explicit
/// `--extra` override list instead of the assembly summary.
pub const EXTRA_DIR: &str = "extra";

/// A raw downloaded file selected for rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub is_extra: bool,
}

#[derive(Debug, Serialize)]
pub struct ScanStats {
    pub files_rewritten: usize,
    pub records_rewritten: usize,
    pub last_sequential_id: u64,
}

/// Deletes `path` on drop unless disarmed. Guards partially written output
/// and decompressed intermediates so no orphan survives any exit path.
pub(crate) struct CleanupGuard {
    path: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Walks the download directory and collects files that still need
/// rewriting for `tool`.
///
/// Selected files end in the tool's raw extension but not its marker
/// extension, so already-rewritten files are skipped and reruns are no-ops.
/// Results are sorted by path to keep kaiju sequence numbering
/// deterministic between runs over the same tree.
pub fn discover_raw_files(root: &Path, tool: Tool) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.wrap_err_with(|| format!("Failed to walk: {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = match entry.file_name().to_str() {
            Some(name) => name,
            None => continue,
        };
        if !name.ends_with(tool.raw_extension()) || name.ends_with(tool.marker_extension()) {
            continue;
        }
        let is_extra = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .and_then(|dir| dir.to_str())
            .map_or(false, |dir| dir == EXTRA_DIR);
        candidates.push(Candidate {
            path: entry.path().to_path_buf(),
            is_extra,
        });
    }
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(
        "Found {} raw {} files under {}",
        candidates.len(),
        tool.raw_extension(),
        root.display()
    );
    Ok(candidates)
}

/// Collects files already rewritten for `tool`, optionally restricted to an
/// allow-list of containing-directory names. Sorted by path so downstream
/// numbering and indexing are deterministic.
pub fn find_rewritten_files(
    root: &Path,
    tool: Tool,
    subset: Option<&[String]>,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.wrap_err_with(|| format!("Failed to walk: {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = match entry.file_name().to_str() {
            Some(name) => name,
            None => continue,
        };
        if !name.ends_with(tool.marker_extension()) {
            continue;
        }
        if let Some(allowed) = subset {
            let in_subset = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|dir| dir.to_str())
                .map_or(false, |dir| allowed.iter().any(|a| a == dir));
            if !in_subset {
                continue;
            }
        }
        files.push(entry.path().to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Extracts the assembly accession from a downloaded file's path. The
/// download layout places each assembly's files in a directory named after
/// its accession, so the accession is the containing directory's name.
pub fn accession_from_path(path: &Path) -> Result<String, TaxforgeError> {
    path.parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| TaxforgeError::AccessionNotInPath(path.to_path_buf()))
}

/// Resolves the taxid for a candidate file.
///
/// Extra files are matched by filename against the override list; anything
/// else goes through the assembly summary. Every failure is typed and fatal
/// to the scan.
pub fn resolve_taxid(
    candidate: &Candidate,
    summary: &AssemblySummary,
    extra_taxids: &FxHashMap<String, u32>,
) -> Result<u32, TaxforgeError> {
    if candidate.is_extra {
        let filename = candidate
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| TaxforgeError::AccessionNotInPath(candidate.path.clone()))?;
        return extra_taxids
            .get(filename)
            .copied()
            .ok_or_else(|| TaxforgeError::ExtraFileMapping(filename.to_string()));
    }
    let accession = accession_from_path(&candidate.path)?;
    summary.lookup(&accession)
}

fn rewritten_path(path: &Path, tool: Tool) -> Result<PathBuf, TaxforgeError> {
    let stem = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(tool.raw_extension()))
        .ok_or_else(|| TaxforgeError::AccessionNotInPath(path.to_path_buf()))?;
    Ok(path.with_file_name(format!("{}{}", stem, tool.marker_extension())))
}

/// Rewrites one compressed file in place.
///
/// The source is stream-decompressed, every header rewritten, and the result
/// stream-recompressed to the marker-named sibling file, so no uncompressed
/// intermediate ever touches disk. On success the source file is deleted,
/// leaving only the rewritten archive; on any failure the partial output is
/// removed and the source left untouched.
pub fn rewrite_file(
    tool: Tool,
    path: &Path,
    taxid: u32,
    counter: &mut SequenceCounter,
    compression_level: niffler::Level,
) -> Result<usize> {
    let (reader, format) = niffler::from_path(path)
        .wrap_err_with(|| format!("Failed to open sequence file: {}", path.display()))?;
    debug!(
        "Detected input compression type for file {} as: {format:?}",
        path.display()
    );
    let reader = BufReader::new(reader);

    let out_path = rewritten_path(path, tool)?;
    let mut guard = CleanupGuard::new(&out_path);
    let out_file = fs::File::create(&out_path)
        .wrap_err_with(|| format!("Failed to create output file: {}", out_path.display()))?;
    let writer = niffler::get_writer(
        Box::new(BufWriter::new(out_file)),
        niffler::Format::Gzip,
        compression_level,
    )
    .wrap_err("Failed to create niffler writer")?;

    let records = rewrite_records(tool, taxid, counter, reader, writer)
        .wrap_err_with(|| format!("Failed to rewrite: {}", path.display()))?;

    fs::remove_file(path)
        .wrap_err_with(|| format!("Failed to remove source file: {}", path.display()))?;
    guard.disarm();
    Ok(records)
}

/// Drives the full rename pipeline over a download directory.
///
/// # Arguments
///
/// * `root` - The download directory to walk.
/// * `tool` - Which classifier format to rewrite headers into.
/// * `summary` - Accession lookup built from the assembly summary table.
/// * `extra_taxids` - filename -> taxid overrides for files under `extra/`.
/// * `counter` - Run-scoped sequence numbering state.
/// * `compression_level` - Gzip level for the rewritten archives.
pub fn rename_genome_files(
    root: &Path,
    tool: Tool,
    summary: &AssemblySummary,
    extra_taxids: &FxHashMap<String, u32>,
    counter: &mut SequenceCounter,
    compression_level: niffler::Level,
) -> Result<ScanStats> {
    let candidates = discover_raw_files(root, tool)?;
    info!("{} files selected for rewriting", candidates.len());

    let mut records_rewritten = 0;
    for candidate in &candidates {
        let taxid = resolve_taxid(candidate, summary, extra_taxids)?;
        debug!(
            "Rewriting {} with taxid {taxid}",
            candidate.path.display()
        );
        records_rewritten +=
            rewrite_file(tool, &candidate.path, taxid, counter, compression_level)?;
    }

    Ok(ScanStats {
        files_rewritten: candidates.len(),
        records_rewritten,
        last_sequential_id: counter.last(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    fn write_gz(path: &Path, content: &[u8]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = niffler::get_writer(
            Box::new(BufWriter::new(file)),
            niffler::Format::Gzip,
            niffler::Level::One,
        )
        .unwrap();
        writer.write_all(content).unwrap();
    }

    fn read_gz(path: &Path) -> String {
        let (reader, _) = niffler::from_path(path).unwrap();
        let mut content = String::new();
        BufReader::new(reader).read_to_string(&mut content).unwrap();
        content
    }

    fn summary_with(rows: &str) -> (tempfile::TempDir, AssemblySummary) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("assembly_summary.txt");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "# comment\n# assembly_accession\ttaxid\n{rows}").unwrap();
        let summary = AssemblySummary::from_path(&path).unwrap();
        (dir, summary)
    }

    #[test]
    fn test_discover_skips_rewritten_and_foreign_files() {
        let dir = tempdir().unwrap();
        let assembly = dir.path().join("GCF_1");
        fs::create_dir_all(&assembly).unwrap();
        write_gz(&assembly.join("GCF_1_genomic.fna.gz"), b">a\nA\n");
        write_gz(&assembly.join("GCF_1_genomic.kraken.fna.gz"), b">a\nA\n");
        write_gz(&assembly.join("GCF_1_protein.faa.gz"), b">a\nM\n");

        let candidates = discover_raw_files(dir.path(), Tool::Kraken).unwrap();

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0]
            .path
            .ends_with("GCF_1/GCF_1_genomic.fna.gz"));
        assert!(!candidates[0].is_extra);
    }

    #[test]
    fn test_discover_flags_extra_files() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join(EXTRA_DIR);
        fs::create_dir_all(&extra).unwrap();
        write_gz(&extra.join("custom.faa.gz"), b">a\nM\n");

        let candidates = discover_raw_files(dir.path(), Tool::Kaiju).unwrap();

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_extra);
    }

    #[test]
    fn test_accession_from_path() {
        let accession =
            accession_from_path(Path::new("/data/viral/GCF_000859985.2/GCF_000859985.2_genomic.fna.gz"))
                .unwrap();

        assert_eq!(accession, "GCF_000859985.2");
    }

    #[test]
    fn test_resolve_extra_file_without_override_fails() {
        let (_dir, summary) = summary_with("GCF_1\t10298\n");
        let candidate = Candidate {
            path: PathBuf::from("/data/extra/custom.faa.gz"),
            is_extra: true,
        };

        let result = resolve_taxid(&candidate, &summary, &FxHashMap::default());

        assert_eq!(
            result,
            Err(TaxforgeError::ExtraFileMapping("custom.faa.gz".to_string()))
        );
    }

    #[test]
    fn test_resolve_extra_file_with_override() {
        let (_dir, summary) = summary_with("GCF_1\t10298\n");
        let candidate = Candidate {
            path: PathBuf::from("/data/extra/custom.faa.gz"),
            is_extra: true,
        };
        let extra: FxHashMap<String, u32> =
            [("custom.faa.gz".to_string(), 777)].into_iter().collect();

        assert_eq!(resolve_taxid(&candidate, &summary, &extra), Ok(777));
    }

    #[test]
    fn test_rename_rewrites_and_removes_source() {
        let dir = tempdir().unwrap();
        let assembly = dir.path().join("GCF_1");
        fs::create_dir_all(&assembly).unwrap();
        let source = assembly.join("GCF_1_genomic.fna.gz");
        write_gz(&source, b">seq1 a virus\nATGC\n");
        let (_sdir, summary) = summary_with("GCF_1\t10298\n");
        let mut counter = SequenceCounter::new();

        let stats = rename_genome_files(
            dir.path(),
            Tool::Kraken,
            &summary,
            &FxHashMap::default(),
            &mut counter,
            niffler::Level::One,
        )
        .unwrap();

        assert_eq!(stats.files_rewritten, 1);
        assert_eq!(stats.records_rewritten, 1);
        assert!(!source.exists());
        let rewritten = assembly.join("GCF_1_genomic.kraken.fna.gz");
        assert_eq!(read_gz(&rewritten), ">seq1|kraken:taxid|10298 a virus\nATGC\n");
    }

    #[test]
    fn test_rename_is_idempotent_across_reruns() {
        let dir = tempdir().unwrap();
        let assembly = dir.path().join("GCF_1");
        fs::create_dir_all(&assembly).unwrap();
        write_gz(&assembly.join("GCF_1_genomic.fna.gz"), b">seq1\nATGC\n");
        let (_sdir, summary) = summary_with("GCF_1\t10298\n");
        let mut counter = SequenceCounter::new();

        let first = rename_genome_files(
            dir.path(),
            Tool::Kraken,
            &summary,
            &FxHashMap::default(),
            &mut counter,
            niffler::Level::One,
        )
        .unwrap();
        let rewritten = assembly.join("GCF_1_genomic.kraken.fna.gz");
        let after_first = read_gz(&rewritten);
        let second = rename_genome_files(
            dir.path(),
            Tool::Kraken,
            &summary,
            &FxHashMap::default(),
            &mut counter,
            niffler::Level::One,
        )
        .unwrap();

        assert_eq!(first.files_rewritten, 1);
        assert_eq!(second.files_rewritten, 0);
        assert_eq!(read_gz(&rewritten), after_first);
    }

    #[test]
    fn test_rename_kaiju_numbers_files_in_path_order() {
        let dir = tempdir().unwrap();
        for name in ["GCF_1", "GCF_2"] {
            let assembly = dir.path().join(name);
            fs::create_dir_all(&assembly).unwrap();
            write_gz(
                &assembly.join(format!("{name}_protein.faa.gz")),
                b">p1 x\nMKV\n>p2 y\nMLL\n",
            );
        }
        let (_sdir, summary) = summary_with("GCF_1\t11\nGCF_2\t22\n");
        let mut counter = SequenceCounter::new();

        let stats = rename_genome_files(
            dir.path(),
            Tool::Kaiju,
            &summary,
            &FxHashMap::default(),
            &mut counter,
            niffler::Level::One,
        )
        .unwrap();

        assert_eq!(stats.records_rewritten, 4);
        assert_eq!(stats.last_sequential_id, 4);
        assert_eq!(
            read_gz(&dir.path().join("GCF_1").join("GCF_1_protein.kaiju.faa.gz")),
            ">1_11\nMKV\n>2_11\nMLL\n"
        );
        assert_eq!(
            read_gz(&dir.path().join("GCF_2").join("GCF_2_protein.kaiju.faa.gz")),
            ">3_22\nMKV\n>4_22\nMLL\n"
        );
    }

    #[test]
    fn test_rename_unknown_accession_aborts_scan() {
        let dir = tempdir().unwrap();
        let assembly = dir.path().join("GCF_unknown");
        fs::create_dir_all(&assembly).unwrap();
        let source = assembly.join("GCF_unknown_genomic.fna.gz");
        write_gz(&source, b">seq1\nATGC\n");
        let (_sdir, summary) = summary_with("GCF_1\t10298\n");
        let mut counter = SequenceCounter::new();

        let result = rename_genome_files(
            dir.path(),
            Tool::Kraken,
            &summary,
            &FxHashMap::default(),
            &mut counter,
            niffler::Level::One,
        );

        assert!(result.is_err());
        // the source is untouched and no partial output is left behind
        assert!(source.exists());
        assert!(!assembly.join("GCF_unknown_genomic.kraken.fna.gz").exists());
    }

    #[test]
    fn test_cleanup_guard_removes_file_unless_disarmed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.gz");

        fs::File::create(&path).unwrap();
        {
            let _guard = CleanupGuard::new(&path);
        }
        assert!(!path.exists());

        fs::File::create(&path).unwrap();
        {
            let mut guard = CleanupGuard::new(&path);
            guard.disarm();
        }
        assert!(path.exists());
    }
}

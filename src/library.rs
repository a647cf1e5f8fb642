use crate::rewrite::{SequenceCounter, Tool};
use crate::scan::find_rewritten_files;
use color_eyre::eyre::Context;
use color_eyre::Result;
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct LibraryStats {
    pub files_aggregated: usize,
    pub records_numbered: usize,
    pub last_sequential_id: u64,
}

/// Prepends the shared sequential id to an already-rewritten header,
/// producing `><sequential_id>_<original-header-suffix>`.
pub fn renumber_header(header: &str, counter: &mut SequenceCounter) -> String {
    format!(">{}_{}", counter.next_id(), &header[1..])
}

/// Streams one protein file into the library, renumbering every header with
/// the run-scoped counter. Body lines pass through verbatim.
pub fn aggregate_records<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    counter: &mut SequenceCounter,
) -> Result<usize> {
    let mut records = 0;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .wrap_err("Error reading library record")?;
        if bytes_read == 0 {
            break;
        }
        if line.starts_with('>') {
            let renumbered = renumber_header(&line, counter);
            writer
                .write_all(renumbered.as_bytes())
                .wrap_err("Error writing renumbered header")?;
            records += 1;
        } else {
            writer
                .write_all(line.as_bytes())
                .wrap_err("Error writing library record")?;
        }
    }

    Ok(records)
}

/// Concatenates every rewritten protein file under `root` into a single flat
/// library file ready for the external indexer.
///
/// Each source file is decompressed on the fly; the sources themselves are
/// left in place. A partial library is deleted if aggregation fails partway
/// through.
///
/// # Arguments
///
/// * `root` - The download directory holding `.kaiju.faa.gz` files.
/// * `output` - Path of the flat library file to create.
/// * `subset` - Optional allow-list of containing-directory names.
/// * `counter` - Run-scoped sequence numbering state, shared with the
///   rewriting pipeline's numbering domain.
pub fn build_library(
    root: &Path,
    output: &Path,
    subset: Option<&[String]>,
    counter: &mut SequenceCounter,
) -> Result<LibraryStats> {
    let files = find_rewritten_files(root, Tool::Kaiju, subset)?;
    info!("Aggregating {} protein files into library", files.len());

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }

    let result = write_library(&files, output, counter);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    let records_numbered = result?;

    Ok(LibraryStats {
        files_aggregated: files.len(),
        records_numbered,
        last_sequential_id: counter.last(),
    })
}

fn write_library(files: &[PathBuf], output: &Path, counter: &mut SequenceCounter) -> Result<usize> {
    let out_file = fs::File::create(output)
        .wrap_err_with(|| format!("Failed to create library file: {}", output.display()))?;
    let mut writer = BufWriter::new(out_file);

    let mut records_numbered = 0;
    for path in files {
        debug!("Adding {} to library", path.display());
        let (reader, _) = niffler::from_path(path)
            .wrap_err_with(|| format!("Failed to open protein file: {}", path.display()))?;
        records_numbered += aggregate_records(BufReader::new(reader), &mut writer, counter)
            .wrap_err_with(|| format!("Failed to aggregate: {}", path.display()))?;
    }

    writer.flush().wrap_err("Error flushing library file")?;
    Ok(records_numbered)
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_renumber_header_keeps_suffix() {
        let mut counter = SequenceCounter::new();

        assert_eq!(renumber_header(">3_22\n", &mut counter), ">1_3_22\n");
        assert_eq!(renumber_header(">4_22\n", &mut counter), ">2_4_22\n");
    }

    #[test]
    fn test_aggregate_records_renumbers_and_copies_bodies() {
        let input = b">1_11\nMKV\nLLM\n>2_11\nMAA\n";
        let mut output = Vec::new();
        let mut counter = SequenceCounter::new();

        let records = aggregate_records(&input[..], &mut output, &mut counter).unwrap();

        assert_eq!(records, 2);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            ">1_1_11\nMKV\nLLM\n>2_2_11\nMAA\n"
        );
    }

    #[test]
    fn test_build_library_concatenates_in_path_order() {
        let dir = tempdir().unwrap();
        for (name, content) in [
            ("GCF_1", &b">1_11\nMKV\n"[..]),
            ("GCF_2", &b">2_22\nMLL\n"[..]),
        ] {
            let assembly = dir.path().join(name);
            fs::create_dir_all(&assembly).unwrap();
            write_gz(&assembly.join(format!("{name}_protein.kaiju.faa.gz")), content);
        }
        let output = dir.path().join("kaiju_library.faa");
        let mut counter = SequenceCounter::new();

        let stats = build_library(dir.path(), &output, None, &mut counter).unwrap();

        assert_eq!(stats.files_aggregated, 2);
        assert_eq!(stats.records_numbered, 2);
        assert_eq!(stats.last_sequential_id, 2);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            ">1_1_11\nMKV\n>2_2_22\nMLL\n"
        );
        // sources are left in place
        assert!(dir.path().join("GCF_1/GCF_1_protein.kaiju.faa.gz").exists());
    }

    #[test]
    fn test_build_library_honours_subset() {
        let dir = tempdir().unwrap();
        for name in ["GCF_1", "GCF_2"] {
            let assembly = dir.path().join(name);
            fs::create_dir_all(&assembly).unwrap();
            write_gz(
                &assembly.join(format!("{name}_protein.kaiju.faa.gz")),
                b">1_9\nM\n",
            );
        }
        let output = dir.path().join("kaiju_library.faa");
        let mut counter = SequenceCounter::new();
        let subset = vec!["GCF_2".to_string()];

        let stats = build_library(dir.path(), &output, Some(&subset), &mut counter).unwrap();

        assert_eq!(stats.files_aggregated, 1);
        assert_eq!(fs::read_to_string(&output).unwrap(), ">1_1_9\nM\n");
    }

    #[test]
    fn test_build_library_ignores_raw_files() {
        let dir = tempdir().unwrap();
        let assembly = dir.path().join("GCF_1");
        fs::create_dir_all(&assembly).unwrap();
        write_gz(&assembly.join("GCF_1_protein.faa.gz"), b">raw\nM\n");
        let output = dir.path().join("kaiju_library.faa");
        let mut counter = SequenceCounter::new();

        let stats = build_library(dir.path(), &output, None, &mut counter).unwrap();

        assert_eq!(stats.files_aggregated, 0);
        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    #[test]
    fn test_build_library_removes_partial_output_on_failure() {
        let dir = tempdir().unwrap();
        let assembly = dir.path().join("GCF_1");
        fs::create_dir_all(&assembly).unwrap();
        // gzip magic followed by garbage: opens fine, fails mid-read
        fs::write(
            assembly.join("GCF_1_protein.kaiju.faa.gz"),
            [0x1f, 0x8b, 0x00, 0x01, 0x02, 0x03],
        )
        .unwrap();
        let output = dir.path().join("kaiju_library.faa");
        let mut counter = SequenceCounter::new();

        let result = build_library(dir.path(), &output, None, &mut counter);

        assert!(result.is_err());
        assert!(!output.exists());
    }
}

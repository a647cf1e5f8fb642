use crate::errors::TaxforgeError;
use color_eyre::eyre::{bail, eyre, Context};
use color_eyre::Result;
use fxhash::FxHashMap;
use log::{debug, info};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Accession -> taxid lookup built from an NCBI assembly_summary table.
///
/// The table is tab-separated: the first line is a metadata comment, the
/// second line is the real header (leading `#` stripped) and columns are
/// located by name, so column reordering in future summary formats does not
/// break parsing. All rows are retained so duplicate accessions can be
/// reported as an error at lookup time.
#[derive(Debug, Default)]
pub struct AssemblySummary {
    taxids: FxHashMap<String, Vec<u32>>,
}

impl AssemblySummary {
    /// Parses an assembly_summary file into the lookup index.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).wrap_err_with(|| {
            format!("Failed to open assembly summary file: {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        // First line is a free-text comment, second is the header row.
        lines
            .next()
            .ok_or_else(|| eyre!("Assembly summary file is empty: {}", path.display()))?
            .wrap_err("Error reading assembly summary comment line")?;
        let header_line = lines
            .next()
            .ok_or_else(|| eyre!("Assembly summary file has no header row: {}", path.display()))?
            .wrap_err("Error reading assembly summary header line")?;

        let (accession_col, taxid_col) = locate_columns(&header_line)?;
        debug!(
            "Assembly summary columns: assembly_accession={accession_col}, taxid={taxid_col}"
        );

        let mut taxids: FxHashMap<String, Vec<u32>> = FxHashMap::default();
        for (row_idx, line_result) in lines.enumerate() {
            let line = line_result.wrap_err("Error reading assembly summary row")?;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let accession = fields.get(accession_col).ok_or_else(|| {
                eyre!("Assembly summary row {} is missing the accession column", row_idx + 3)
            })?;
            let taxid_field = fields.get(taxid_col).ok_or_else(|| {
                eyre!("Assembly summary row {} is missing the taxid column", row_idx + 3)
            })?;
            let taxid = taxid_field
                .trim()
                .parse::<u32>()
                .wrap_err_with(|| format!("Error parsing taxid: '{taxid_field}'"))?;
            taxids
                .entry(accession.trim().to_string())
                .or_default()
                .push(taxid);
        }

        info!("Loaded {} assemblies from {}", taxids.len(), path.display());
        Ok(Self { taxids })
    }

    /// Resolves an accession to its taxid.
    ///
    /// Exactly one matching row is required: zero matches or duplicates are
    /// typed errors that abort the enclosing scan.
    pub fn lookup(&self, accession: &str) -> Result<u32, TaxforgeError> {
        match self.taxids.get(accession) {
            Some(rows) if rows.len() == 1 => Ok(rows[0]),
            Some(rows) => Err(TaxforgeError::AmbiguousAccession {
                accession: accession.to_string(),
                count: rows.len(),
            }),
            None => Err(TaxforgeError::UnknownAccession {
                accession: accession.to_string(),
            }),
        }
    }
}

fn locate_columns(header_line: &str) -> Result<(usize, usize)> {
    let header = header_line.strip_prefix('#').unwrap_or(header_line);
    let mut accession_col = None;
    let mut taxid_col = None;
    for (idx, name) in header.split('\t').enumerate() {
        match name.trim() {
            "assembly_accession" => accession_col = Some(idx),
            "taxid" => taxid_col = Some(idx),
            _ => {}
        }
    }
    match (accession_col, taxid_col) {
        (Some(a), Some(t)) => Ok((a, t)),
        _ => bail!("Assembly summary header is missing the assembly_accession or taxid column"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_summary(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("assembly_summary.txt");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    const SUMMARY: &str = "#   See ftp://ftp.ncbi.nlm.nih.gov/genomes/README_assembly_summary.txt\n\
# assembly_accession\tbioproject\ttaxid\tspecies_taxid\n\
GCF_000859985.2\tPRJNA485481\t10298\t10298\n\
GCF_000861825.2\tPRJNA485481\t333760\t10566\n";

    #[test]
    fn test_lookup_resolves_taxid() {
        let (_dir, path) = write_summary(SUMMARY);
        let summary = AssemblySummary::from_path(&path).unwrap();

        assert_eq!(summary.lookup("GCF_000859985.2").unwrap(), 10298);
        assert_eq!(summary.lookup("GCF_000861825.2").unwrap(), 333760);
    }

    #[test]
    fn test_lookup_unknown_accession() {
        let (_dir, path) = write_summary(SUMMARY);
        let summary = AssemblySummary::from_path(&path).unwrap();

        assert_eq!(
            summary.lookup("GCF_000000000.0"),
            Err(TaxforgeError::UnknownAccession {
                accession: "GCF_000000000.0".to_string()
            })
        );
    }

    #[test]
    fn test_lookup_duplicate_accession_is_ambiguous() {
        let duplicated = "# comment\n\
# assembly_accession\ttaxid\n\
GCF_000859985.2\t10298\n\
GCF_000859985.2\t10299\n";
        let (_dir, path) = write_summary(duplicated);
        let summary = AssemblySummary::from_path(&path).unwrap();

        assert_eq!(
            summary.lookup("GCF_000859985.2"),
            Err(TaxforgeError::AmbiguousAccession {
                accession: "GCF_000859985.2".to_string(),
                count: 2,
            })
        );
    }

    #[test]
    fn test_missing_columns_is_fatal() {
        let no_taxid = "# comment\n# assembly_accession\tbioproject\nGCF_1\tPRJ\n";
        let (_dir, path) = write_summary(no_taxid);

        assert!(AssemblySummary::from_path(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = AssemblySummary::from_path(Path::new("idontexist.txt"));

        assert!(result.is_err());
    }

    #[test]
    fn test_bad_taxid_is_fatal() {
        let bad = "# comment\n# assembly_accession\ttaxid\nGCF_1\tnotanumber\n";
        let (_dir, path) = write_summary(bad);

        assert!(AssemblySummary::from_path(&path).is_err());
    }
}

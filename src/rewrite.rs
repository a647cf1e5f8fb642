use clap::ValueEnum;
use color_eyre::eyre::Context;
use color_eyre::Result;
use std::io::{BufRead, Write};

/// Classifier a database is being prepared for. Determines which raw files
/// are selected and how sequence headers are rewritten.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tool {
    /// Genomic databases built from .fna.gz files
    Kraken,
    /// Protein databases built from .faa.gz files
    Kaiju,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Kraken => "kraken",
            Tool::Kaiju => "kaiju",
        }
    }

    /// Extension of raw downloaded files this tool consumes.
    pub fn raw_extension(&self) -> &'static str {
        match self {
            Tool::Kraken => ".fna.gz",
            Tool::Kaiju => ".faa.gz",
        }
    }

    /// Extension carried by files that have already been rewritten. Files
    /// matching this are skipped by the scanner, making reruns no-ops.
    pub fn marker_extension(&self) -> &'static str {
        match self {
            Tool::Kraken => ".kraken.fna.gz",
            Tool::Kaiju => ".kaiju.faa.gz",
        }
    }
}

/// Run-scoped sequence numbering state.
///
/// Kaiju headers and library aggregation share one numbering domain: ids are
/// strictly increasing and gap-free across every file processed in a run.
/// The counter is threaded explicitly through the pipeline rather than held
/// in global state so numbering is deterministic and testable in isolation.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequential id and advances the counter.
    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Highest id handed out so far (0 if none).
    pub fn last(&self) -> u64 {
        self.last
    }
}

/// Rewrites a kraken header line by inserting `|kraken:taxid|<taxid>` at the
/// first whitespace character, preserving everything before and after. A
/// header with no whitespace before its newline gets the tag at the end of
/// the line. The input may carry its trailing newline; the newline counts as
/// whitespace, which places the tag exactly at end-of-line for bare headers.
pub fn kraken_header(header: &str, taxid: u32) -> String {
    let insert = header
        .find([' ', '\t', '\r', '\n'])
        .unwrap_or(header.len());
    format!(
        "{}|kraken:taxid|{}{}",
        &header[..insert],
        taxid,
        &header[insert..]
    )
}

/// Rewrites a kaiju header: the original identifier is discarded entirely and
/// replaced with `><sequential_id>_<taxid>`.
pub fn kaiju_header(taxid: u32, counter: &mut SequenceCounter) -> String {
    format!(">{}_{}\n", counter.next_id(), taxid)
}

/// Streams FASTA-style content through the header rewriter.
///
/// Header lines (starting with `>`) are rewritten for `tool` with the
/// resolved `taxid`; body lines pass through byte-for-byte. This is a pure
/// transformation from reader to writer - file discovery, decompression and
/// cleanup live in the scanner, so this logic is testable without any
/// filesystem.
///
/// # Arguments
///
/// * `tool` - The target classifier format.
/// * `taxid` - The taxid resolved for the whole file.
/// * `counter` - Run-scoped sequence numbering state (kaiju only).
/// * `reader` - Decompressed input content.
/// * `writer` - Destination for the rewritten content.
///
/// # Returns
///
/// The number of header lines rewritten.
pub fn rewrite_records<R: BufRead, W: Write>(
    tool: Tool,
    taxid: u32,
    counter: &mut SequenceCounter,
    mut reader: R,
    mut writer: W,
) -> Result<usize> {
    let mut records = 0;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .wrap_err("Error reading sequence line")?;
        if bytes_read == 0 {
            break;
        }

        if line.starts_with('>') {
            let rewritten = match tool {
                Tool::Kraken => kraken_header(&line, taxid),
                Tool::Kaiju => kaiju_header(taxid, counter),
            };
            writer
                .write_all(rewritten.as_bytes())
                .wrap_err("Error writing rewritten header")?;
            records += 1;
        } else {
            writer
                .write_all(line.as_bytes())
                .wrap_err("Error writing sequence line")?;
        }
    }

    Ok(records)
}

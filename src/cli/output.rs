//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::barrel::{BarrelInfo, BarrelSnapshot};
use crate::cli::args::{OutputFormat, QuiverArgs};
use crate::error::Result;
use crate::posting::PostingEntry;

/// One barrel of the registry listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct BarrelRow {
    pub name: String,
    pub doc_begin: String,
    pub doc_count: u32,
    pub max_doc: u32,
    pub in_memory: bool,
    pub searchable: bool,
    pub is_update: bool,
    pub compression: String,
}

impl From<&BarrelInfo> for BarrelRow {
    fn from(info: &BarrelInfo) -> Self {
        BarrelRow {
            name: info.name.clone(),
            doc_begin: info.doc_begin_string(),
            doc_count: info.doc_count,
            max_doc: info.max_doc_id,
            in_memory: info.in_memory,
            searchable: info.searchable,
            is_update: info.is_update,
            compression: info.compression.to_string(),
        }
    }
}

/// Result structure for the barrel listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct BarrelListing {
    pub barrel_counter: u64,
    pub max_doc: u32,
    pub total_documents: u64,
    pub barrels: Vec<BarrelRow>,
}

impl From<&BarrelSnapshot> for BarrelListing {
    fn from(snapshot: &BarrelSnapshot) -> Self {
        BarrelListing {
            barrel_counter: snapshot.barrel_counter,
            max_doc: snapshot.max_doc,
            total_documents: snapshot.doc_count(),
            barrels: snapshot.barrels.iter().map(BarrelRow::from).collect(),
        }
    }
}

/// One vocabulary entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermRow {
    pub term: u32,
    pub df: u32,
    pub ctf: u64,
    pub offset: u64,
}

/// Result structure for the vocabulary listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermListing {
    pub barrel: String,
    pub total_terms: usize,
    pub terms: Vec<TermRow>,
}

/// One decoded document of a posting.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostingRow {
    pub doc_id: u32,
    pub freq: u32,
    pub doc_len: u32,
    pub positions: Vec<u32>,
    pub sub_positions: Vec<u32>,
}

impl From<PostingEntry> for PostingRow {
    fn from(entry: PostingEntry) -> Self {
        PostingRow {
            doc_id: entry.doc.doc_id,
            freq: entry.doc.freq,
            doc_len: entry.doc.doc_len,
            positions: entry.positions,
            sub_positions: entry.sub_positions,
        }
    }
}

/// Result structure for a posting dump.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostingDump {
    pub barrel: String,
    pub term: u32,
    pub df: u32,
    pub ctf: u64,
    pub skip_entries: usize,
    pub documents: Vec<PostingRow>,
}

/// Result structure for maintenance commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct MaintenanceResult {
    pub renames: Vec<(String, String)>,
    pub merged: Option<BarrelRow>,
    pub duration_ms: u64,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize + HumanOutput>(
    message: &str,
    result: &T,
    args: &QuiverArgs,
) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 1 {
                println!("{message}");
                println!();
            }
            result.print_human();
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &QuiverArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

/// Human-readable rendering of a command result.
pub trait HumanOutput {
    fn print_human(&self);
}

impl HumanOutput for BarrelListing {
    fn print_human(&self) {
        println!("Barrels:");
        println!("════════");
        println!(
            "{:<10} {:<16} {:>10} {:>10} {:>7} {:>10}",
            "NAME", "DOC BEGIN", "DOCS", "MAX DOC", "MEMORY", "SEARCHABLE"
        );
        for row in &self.barrels {
            println!(
                "{:<10} {:<16} {:>10} {:>10} {:>7} {:>10}",
                row.name, row.doc_begin, row.doc_count, row.max_doc, row.in_memory, row.searchable
            );
        }
        println!();
        println!("Total documents: {}", self.total_documents);
        println!("Max doc id: {}", self.max_doc);
        println!("Next barrel: _{}", self.barrel_counter);
    }
}

impl HumanOutput for TermListing {
    fn print_human(&self) {
        println!("Vocabulary of {} ({} terms):", self.barrel, self.total_terms);
        println!("{:>12} {:>10} {:>12} {:>12}", "TERM", "DF", "CTF", "OFFSET");
        for row in &self.terms {
            println!(
                "{:>12} {:>10} {:>12} {:>12}",
                row.term, row.df, row.ctf, row.offset
            );
        }
        if self.terms.len() < self.total_terms {
            println!("... {} more", self.total_terms - self.terms.len());
        }
    }
}

impl HumanOutput for PostingDump {
    fn print_human(&self) {
        println!(
            "Term {} in {}: df={} ctf={} skip entries={}",
            self.term, self.barrel, self.df, self.ctf, self.skip_entries
        );
        for row in &self.documents {
            let locations: Vec<String> = row
                .positions
                .iter()
                .zip(&row.sub_positions)
                .map(|(p, s)| if *s == 0 { p.to_string() } else { format!("{p}+{s}") })
                .collect();
            println!(
                "  doc {:>10}  tf {:>4}  len {:>6}  [{}]",
                row.doc_id,
                row.freq,
                row.doc_len,
                locations.join(", ")
            );
        }
    }
}

impl HumanOutput for MaintenanceResult {
    fn print_human(&self) {
        for (from, to) in &self.renames {
            println!("{from} -> {to}");
        }
        if let Some(merged) = &self.merged {
            println!(
                "Merged into {} ({} documents, max doc {})",
                merged.name, merged.doc_count, merged.max_doc
            );
        }
        println!("Done in {}", format_duration(self.duration_ms));
    }
}

/// Format a millisecond duration.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.2}s", ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::DocEntry;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(15), "15ms");
        assert_eq!(format_duration(2500), "2.50s");
    }

    #[test]
    fn test_rows_serialize() {
        let mut info = BarrelInfo::new("_4");
        info.record_document(0, 7);
        let row = BarrelRow::from(&info);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["doc_begin"], "0:7");
        assert_eq!(json["compression"], "varbyte");

        let posting = PostingRow::from(PostingEntry {
            doc: DocEntry {
                doc_id: 3,
                freq: 2,
                doc_len: 9,
            },
            positions: vec![1, 4],
            sub_positions: vec![0, 0],
        });
        assert_eq!(serde_json::to_value(&posting).unwrap()["positions"][1], 4);
    }
}

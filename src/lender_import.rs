//! CSV import of the lender directory.
//!
//! Columns: `name, aliases, display_name, export_name, dca_eligible,
//! irl_eligible, cost_priority_rank`. Aliases are `|`-separated. Blank
//! display and export names fall back to `name`.

use crate::db_storage::LenderUpsert;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct LenderCsvRow {
    name: String,
    #[serde(default)]
    aliases: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    export_name: Option<String>,
    #[serde(default)]
    dca_eligible: Option<String>,
    #[serde(default)]
    irl_eligible: Option<String>,
    #[serde(default)]
    cost_priority_rank: Option<i32>,
}

/// Maps a spreadsheet Yes/No cell onto the stored value; anything else is `fallback`.
fn yes_no_cell(raw: Option<&str>, fallback: &str) -> String {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("yes") | Some("y") => "Yes".to_string(),
        Some("no") | Some("n") => "No".to_string(),
        _ => fallback.to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<LenderCsvRow> for LenderUpsert {
    fn from(row: LenderCsvRow) -> Self {
        let name = row.name.trim().to_string();
        let aka_names = row
            .aliases
            .as_deref()
            .unwrap_or("")
            .split('|')
            .map(str::trim)
            .filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case(&name))
            .map(str::to_string)
            .collect();

        LenderUpsert {
            display_name: non_blank(row.display_name).unwrap_or_else(|| name.clone()),
            export_name: non_blank(row.export_name).unwrap_or_else(|| name.clone()),
            // blank DCA means unknown; blank IRL means not eligible
            dca_eligible: yes_no_cell(row.dca_eligible.as_deref(), ""),
            irl_eligible: yes_no_cell(row.irl_eligible.as_deref(), "No"),
            cost_priority_rank: row.cost_priority_rank.unwrap_or(0),
            aka_names,
            canonical_name: name,
        }
    }
}

/// Parses every row, skipping blank names. Returns rows and the count of
/// rows that failed to parse, with their line numbers logged.
pub fn parse_lender_csv<R: Read>(reader: R) -> (Vec<LenderUpsert>, usize) {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut lenders = Vec::new();
    let mut errors = 0;

    for (index, record) in csv_reader.deserialize::<LenderCsvRow>().enumerate() {
        match record {
            Ok(row) if row.name.trim().is_empty() => continue,
            Ok(row) => lenders.push(LenderUpsert::from(row)),
            Err(e) => {
                errors += 1;
                // +2: header row and 1-based numbering
                tracing::warn!("Skipping row {}: {}", index + 2, e);
            }
        }
    }

    (lenders, errors)
}

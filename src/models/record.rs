use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row pulled out of a source page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    /// Every cell of the row, trimmed, in source order.
    pub cells: Vec<String>,
}

impl Record {
    /// Name-bearing fields in match priority order, skipping empty ones.
    pub fn name_fields(&self) -> impl Iterator<Item = (MatchField, &str)> {
        [
            (MatchField::Name, Some(self.name.as_str())),
            (MatchField::FatherName, self.father_name.as_deref()),
            (MatchField::MotherName, self.mother_name.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.filter(|v| !v.is_empty()).map(|v| (field, v)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Name,
    FatherName,
    MotherName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedEntry {
    pub record: Record,
    pub score: u8,
    pub field: MatchField,
    /// The token or substring of the candidate that carried the match.
    pub matched_text: String,
    pub unit_key: NaiveDate,
    pub query: Option<String>,
}

/// All matches seen for one date, merged across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundUnit {
    pub unit_key: NaiveDate,
    pub entries: Vec<MatchedEntry>,
    /// Rows observed on the most recent successful fetch of this date.
    pub raw_count: usize,
}

/// A record kept verbatim when the job has no queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub unit_key: NaiveDate,
    pub record: Record,
}

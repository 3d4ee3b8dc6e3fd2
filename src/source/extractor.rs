use scraper::{ElementRef, Html, Selector};

use crate::error::AppError;
use crate::models::record::Record;
use crate::source::SourceProfile;
use crate::source::profile::ColumnMap;

/// Turns a result page into ordered [`Record`]s.
pub struct RecordExtractor {
    row_selectors: Vec<Selector>,
    cell_selector: Selector,
    min_columns: usize,
    placeholders: Vec<String>,
    columns: ColumnMap,
}

impl RecordExtractor {
    pub fn new(profile: &SourceProfile) -> Result<Self, AppError> {
        let row_selectors = profile
            .row_selectors
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    tracing::warn!("Ignoring invalid row selector '{s}': {e}");
                    None
                }
            })
            .collect::<Vec<_>>();
        if row_selectors.is_empty() {
            return Err(AppError::BadRequest(
                "Profile has no usable row selectors".to_string(),
            ));
        }

        let cell_selector = Selector::parse("td")
            .map_err(|e| AppError::Internal(format!("Invalid cell selector: {e}")))?;

        Ok(Self {
            row_selectors,
            cell_selector,
            min_columns: profile.min_columns,
            placeholders: profile
                .placeholders
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            columns: profile.columns.clone(),
        })
    }

    /// Rows of the first selector that matches anything, in source order.
    ///
    /// A page without any matching rows is a valid empty result.
    pub fn extract(&self, payload: &str) -> Vec<Record> {
        let doc = Html::parse_document(payload);

        for (priority, selector) in self.row_selectors.iter().enumerate() {
            let rows: Vec<ElementRef> = doc.select(selector).collect();
            if rows.is_empty() {
                continue;
            }
            let records: Vec<Record> = rows.into_iter().filter_map(|r| self.record(r)).collect();
            tracing::debug!(priority, records = records.len(), "Extracted rows");
            return records;
        }

        tracing::debug!("No row container matched");
        Vec::new()
    }

    fn record(&self, row: ElementRef) -> Option<Record> {
        let cells: Vec<String> = row
            .select(&self.cell_selector)
            .map(|td| td.text().collect::<Vec<_>>().join(" "))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();

        if cells.len() < self.min_columns {
            return None;
        }

        let name = cells.get(self.columns.name)?.clone();
        if self.is_placeholder(&name) {
            return None;
        }

        let pick = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .filter(|v| !self.is_placeholder(v))
                .cloned()
        };

        Some(Record {
            father_name: pick(self.columns.father_name),
            mother_name: pick(self.columns.mother_name),
            name,
            cells,
        })
    }

    fn is_placeholder(&self, value: &str) -> bool {
        value.is_empty()
            || value.chars().all(|c| c == '.')
            || self.placeholders.contains(&value.to_lowercase())
    }
}

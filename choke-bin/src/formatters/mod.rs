pub(crate) mod destinations;
pub(crate) mod log;
pub(crate) mod simulation;
pub(crate) mod status;

use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Segment},
};

use crate::options::OutputFormat;

/// Render rows either as a table or as pretty-printed JSON
pub(crate) fn render<T: Tabled + Serialize>(
    rows: &[T],
    format: OutputFormat,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Table => Ok(table(rows)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
    }
}

fn table<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows)
        .with(Modify::new(Segment::all()).with(Alignment::left()))
        .with(Style::sharp())
        .to_string()
}

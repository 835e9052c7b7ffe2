pub(crate) mod check;
pub(crate) mod simulate;
pub(crate) mod status;

pub(crate) use check::check;
pub(crate) use simulate::simulate;
pub(crate) use status::status;

use anyhow::Result;

use crate::formatters;
use crate::options::OutputFormat;

/// Render `rows` and print them to stdout, skipping empty tables
fn print_rows<T: tabled::Tabled + serde::Serialize>(
    rows: &[T],
    format: OutputFormat,
) -> Result<()> {
    let output = formatters::render(rows, format)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Table formatting for scan results using comfy-table

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use widerow_client::Row;

/// Format rows as a table with one line per cell version
///
/// Columns are row key, `family:qualifier`, timestamp and value. The row key
/// is only printed on the first line of each row.
pub fn format_rows_table(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No rows found".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("row key"),
        Cell::new("column"),
        Cell::new("timestamp"),
        Cell::new("value"),
    ]);

    for row in rows {
        let mut first = true;
        for family in &row.families {
            for column in &family.columns {
                let name = format!("{}:{}", family.name, display_bytes(&column.qualifier));
                for cell in &column.cells {
                    let key = if first { display_bytes(&row.key) } else { String::new() };
                    first = false;
                    table.add_row(vec![
                        Cell::new(key),
                        Cell::new(&name),
                        Cell::new(cell.timestamp_micros),
                        Cell::new(display_bytes(&cell.value)),
                    ]);
                }
            }
        }
    }

    table.to_string()
}

/// Text as-is, anything else as a size marker
pub fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => format!("<Binary {} bytes>", bytes.len()),
    }
}

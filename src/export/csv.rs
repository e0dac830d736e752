use super::rows::{ExportRow, EXPORT_HEADERS};

/// Quotes a field when it contains a comma, a quote or a line break.
pub fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Header line plus one line per row, `\n`-separated, no trailing newline.
pub fn render(rows: &[ExportRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(EXPORT_HEADERS.join(","));
    for row in rows {
        let fields: Vec<String> = row.fields().iter().map(|f| escape_field(f)).collect();
        lines.push(fields.join(","));
    }
    lines.join("\n")
}

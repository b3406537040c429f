//! Compact tabular encoding for uniform records.
//!
//! ```text
//! [2]{n,a}:
//!   Midnight City,M83
//!   "Hello, Goodbye",The Beatles
//! ```

/// Encode `rows` under the field names `keys`. Values containing a comma,
/// quote, newline or surrounding whitespace are written as JSON strings.
pub fn encode_records<R: AsRef<[String]>>(keys: &[&str], rows: &[R]) -> String {
    let mut out = format!("[{}]{{{}}}:", rows.len(), keys.join(","));
    for row in rows {
        out.push_str("\n  ");
        let cells: Vec<String> = row.as_ref().iter().map(|v| encode_value(v)).collect();
        out.push_str(&cells.join(","));
    }
    out
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.trim() != value
        || value.contains([',', '"', '\n', '\r'])
}

fn encode_value(value: &str) -> String {
    if needs_quoting(value) {
        serde_json::Value::String(value.to_string()).to_string()
    } else {
        value.to_string()
    }
}

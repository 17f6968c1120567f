// dumptool/src/backup/codec.rs
use chrono::NaiveDateTime;

/// A column value read from the source, before it becomes SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    /// Anything without a dedicated rendering; written as escaped text.
    Other(String),
}

/// Renders a value as a SQL literal.
pub fn format_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::UInt(v) => v.to_string(),
        // Display on f64 is the shortest text that parses back to the same value.
        SqlValue::Float(v) if v.is_finite() => v.to_string(),
        SqlValue::Float(_) => "NULL".to_string(),
        SqlValue::Bool(true) => "1".to_string(),
        SqlValue::Bool(false) => "0".to_string(),
        SqlValue::Text(s) | SqlValue::Other(s) => quote(s),
        SqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => quote(s),
            Err(_) => format!("X'{}'", hex::encode_upper(bytes)),
        },
        SqlValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", escape_string(s))
}

/// Escapes a string for use inside a single-quoted MySQL literal.
///
/// Backslash goes first; any later substitution would otherwise be
/// escaped a second time.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

/// `(v1, v2, ...)` for one row.
pub fn format_row(values: &[SqlValue]) -> String {
    let rendered: Vec<String> = values.iter().map(format_value).collect();
    format!("({})", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_format_scalars() {
        assert_eq!(format_value(&SqlValue::Null), "NULL");
        assert_eq!(format_value(&SqlValue::Int(42)), "42");
        assert_eq!(format_value(&SqlValue::Int(-7)), "-7");
        assert_eq!(format_value(&SqlValue::UInt(u64::MAX)), "18446744073709551615");
        assert_eq!(format_value(&SqlValue::Float(3.14)), "3.14");
        assert_eq!(format_value(&SqlValue::Float(0.1 + 0.2)), "0.30000000000000004");
        assert_eq!(format_value(&SqlValue::Float(f64::NAN)), "NULL");
        assert_eq!(format_value(&SqlValue::Bool(true)), "1");
        assert_eq!(format_value(&SqlValue::Bool(false)), "0");
    }

    #[test]
    fn test_format_text_and_bytes() {
        assert_eq!(format_value(&SqlValue::Text("hello world".into())), "'hello world'");
        assert_eq!(format_value(&SqlValue::Text("hello 'world'".into())), "'hello \\'world\\''");
        assert_eq!(format_value(&SqlValue::Bytes(b"hello".to_vec())), "'hello'");
        assert_eq!(format_value(&SqlValue::Bytes(vec![0xff, 0x00, 0x10])), "X'FF0010'");
        assert_eq!(format_value(&SqlValue::Other("12.50".into())), "'12.50'");
    }

    #[test]
    fn test_format_datetime_drops_subseconds() -> anyhow::Result<()> {
        let dt = NaiveDate::from_ymd_opt(2023, 12, 25)
            .and_then(|d| d.and_hms_milli_opt(15, 30, 45, 120))
            .ok_or_else(|| anyhow::anyhow!("invalid test date"))?;
        assert_eq!(format_value(&SqlValue::DateTime(dt)), "'2023-12-25 15:30:45'");
        Ok(())
    }

    #[test]
    fn test_escape_order() {
        assert_eq!(escape_string("It's a \"x\"\n"), "It\\'s a \\\"x\\\"\\n");
        assert_eq!(escape_string("a\\b"), "a\\\\b");
        assert_eq!(escape_string("\\'"), "\\\\\\'");
        assert_eq!(escape_string("line1\r\nline2\tend"), "line1\\r\\nline2\\tend");
        assert_eq!(escape_string("plain"), "plain");
    }

    #[test]
    fn test_format_row() {
        let row = vec![SqlValue::Int(1), SqlValue::Text("a".into()), SqlValue::Null];
        assert_eq!(format_row(&row), "(1, 'a', NULL)");
    }
}

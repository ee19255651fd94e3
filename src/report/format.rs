//! Number and cell formatting for report tables.

use crate::models::{MetricValue, Value};

/// Decimal places for summed decimal metrics.
pub const DECIMAL_PLACES: usize = 2;

/// Decimal places for derived ratios.
pub const RATIO_PLACES: usize = 4;

/// Insert `,` between groups of three digits.
fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Format an integer with thousands separators.
pub fn format_int(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let grouped = group_thousands(&digits);
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Format a decimal with thousands separators and fixed places.
pub fn format_decimal(value: f64, places: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let fixed = format!("{:.*}", places, value.abs());
    let (whole, fraction) = match fixed.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut out = String::new();
    // Avoid "-0.00"
    if value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    out.push_str(&group_thousands(whole));
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

/// Format a metric: integers grouped, decimals to `places`.
pub fn format_metric(value: &MetricValue, places: usize) -> String {
    match value {
        MetricValue::Int(i) => format_int(*i),
        MetricValue::Float(x) => format_decimal(*x, places),
    }
}

/// Format a group-key cell for a Markdown table.
pub fn format_key(value: &Value) -> String {
    match value {
        Value::Null => "(none)".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => format_decimal(*x, DECIMAL_PLACES),
        Value::Text(s) => escape_cell(s),
    }
}

/// Escape characters that would break a Markdown table row.
pub fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_int() {
        assert_eq!(format_int(0), "0");
        assert_eq!(format_int(999), "999");
        assert_eq!(format_int(1000), "1,000");
        assert_eq!(format_int(1234567), "1,234,567");
        assert_eq!(format_int(-45000), "-45,000");
        assert_eq!(format_int(i64::MIN), "-9,223,372,036,854,775,808");
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_decimal(0.5, 2), "0.50");
        assert_eq!(format_decimal(-1500.0, 2), "-1,500.00");
        assert_eq!(format_decimal(-0.001, 2), "0.00");
        assert_eq!(format_decimal(1.09, 4), "1.0900");
    }

    #[test]
    fn test_format_metric_and_keys() {
        assert_eq!(format_metric(&MetricValue::Int(12000), DECIMAL_PLACES), "12,000");
        assert_eq!(format_metric(&MetricValue::Float(2.0 / 3.0), RATIO_PLACES), "0.6667");
        assert_eq!(format_key(&Value::Int(2023)), "2023");
        assert_eq!(format_key(&Value::Null), "(none)");
        assert_eq!(format_key(&Value::text("a|b")), "a\\|b");
    }
}

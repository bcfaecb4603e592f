//! Number and text formatting for report tables

/// `1234567` -> `1,234,567`
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Optional count with separators, `NA` when missing
pub fn format_count(n: Option<u64>) -> String {
    n.map_or_else(|| "NA".to_string(), format_thousands)
}

/// Rounded to an integer and grouped; `NA` for non-finite values
pub fn format_mean(v: f64) -> String {
    if !v.is_finite() {
        return "NA".to_string();
    }
    let rounded = v.round();
    let grouped = format_thousands(rounded.abs() as u64);
    if rounded < 0.0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Value rounded to `digits` significant digits. Very small or large
/// magnitudes use scientific notation.
pub fn format_significant(v: f64, digits: usize) -> String {
    if v.is_nan() {
        return "NA".to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Inf".to_string() } else { "-Inf".to_string() };
    }
    let digits = digits.max(1) as i32;
    let magnitude = v.abs().log10().floor() as i32;
    if magnitude < -4 || magnitude >= 15 {
        return format!("{:.*e}", (digits - 1) as usize, v);
    }
    let scale = 10f64.powi(digits - 1 - magnitude);
    let rounded = (v * scale).round() / scale;
    let decimals = (digits - 1 - magnitude).max(0) as usize;
    format!("{:.*}", decimals, rounded)
}

/// Escape text for HTML element content and attribute values
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_format_count_na() {
        assert_eq!(format_count(None), "NA");
        assert_eq!(format_count(Some(25_000)), "25,000");
    }

    #[test]
    fn test_format_mean() {
        assert_eq!(format_mean(12345.6), "12,346");
        assert_eq!(format_mean(f64::NAN), "NA");
    }

    #[test]
    fn test_format_significant() {
        assert_eq!(format_significant(1234.5, 3), "1230");
        assert_eq!(format_significant(0.012345, 3), "0.0123");
        assert_eq!(format_significant(-2.71828, 3), "-2.72");
        assert_eq!(format_significant(1.5e-10, 3), "1.50e-10");
        assert_eq!(format_significant(f64::NAN, 3), "NA");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}

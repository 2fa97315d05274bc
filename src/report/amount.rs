//! Monetary amount parsing
//!
//! Reports mix French and English number conventions ("1 500 000",
//! "1,500,000", "1.234,56", "12,5"). Separators are disambiguated from
//! their position and count instead of assuming a single locale.

/// Parse a number as written in a report, tolerating grouping separators
pub fn parse_amount(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.trim_matches(|c| c == '.' || c == ',');
    if compact.is_empty() {
        return None;
    }

    let normalized = match (compact.rfind('.'), compact.rfind(',')) {
        (Some(dot), Some(comma)) => {
            // Whichever comes last is the decimal separator
            let (decimal, grouping) = if dot > comma { ('.', ',') } else { (',', '.') };
            compact.replace(grouping, "").replace(decimal, ".")
        }
        (Some(_), None) => normalize_single_separator(compact, '.'),
        (None, Some(_)) => normalize_single_separator(compact, ','),
        (None, None) => compact.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Only one kind of separator present
fn normalize_single_separator(s: &str, sep: char) -> String {
    if s.matches(sep).count() > 1 {
        return s.replace(sep, "");
    }

    match s.split_once(sep) {
        Some((int, frac)) if frac.len() == 3 && !int.is_empty() && int != "0" => {
            format!("{}{}", int, frac)
        }
        Some((int, frac)) => format!("{}.{}", int, frac),
        None => s.to_string(),
    }
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_grouping() {
        assert_eq!(parse_amount("1 500 000"), Some(1_500_000.0));
        assert_eq!(parse_amount("250\u{a0}000"), Some(250_000.0));
        assert_eq!(parse_amount("450\u{202f}000"), Some(450_000.0));
    }

    #[test]
    fn test_comma_grouping_is_not_a_decimal() {
        assert_eq!(parse_amount("1,500,000"), Some(1_500_000.0));
        assert_eq!(parse_amount("1,500"), Some(1_500.0));
        assert_eq!(parse_amount("1.500.000"), Some(1_500_000.0));
    }

    #[test]
    fn test_decimal_separators() {
        assert_eq!(parse_amount("12,5"), Some(12.5));
        assert_eq!(parse_amount("12.75"), Some(12.75));
        assert_eq!(parse_amount("0,125"), Some(0.125));
        assert_eq!(parse_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
    }

    #[test]
    fn test_trailing_punctuation_and_garbage() {
        assert_eq!(parse_amount("450 000."), Some(450_000.0));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount(",."), None);
        assert_eq!(parse_amount("1.2.3,4,5"), None);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.005 * 1000.0), 1005.0);
        assert_eq!(round2(2.3456), 2.35);
    }
}

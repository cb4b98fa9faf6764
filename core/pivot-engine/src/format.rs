//! FILENAME: core/pivot-engine/src/format.rs
//! PURPOSE: Rendering of summed cell values.
//! CONTEXT: Formatting runs after summation and never feeds back into the
//! numeric accumulation. Output mirrors the host UI's locale conventions.

use crate::definition::FormatType;

/// Format a summed value for display.
pub fn format_value(value: f64, format: FormatType) -> String {
    match format {
        FormatType::Number => format_number(value),
        FormatType::Currency => format_currency_usd(value),
        FormatType::Percent => format_percent(value),
        FormatType::Eur => format_currency_eur(value),
    }
}

/// en-US grouping, at most two fraction digits, trailing zeros trimmed.
fn format_number(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    with_sign(value, &fixed, add_thousands_separator(trimmed, ',', '.'))
}

/// `$1,234.50`, negatives as `-$1,234.50`.
fn format_currency_usd(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let body = format!("${}", add_thousands_separator(&fixed, ',', '.'));
    with_sign(value, &fixed, body)
}

/// The value is already a percentage: 12.5 renders as `12.50%`.
fn format_percent(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let body = format!("{}%", add_thousands_separator(&fixed, ',', '.'));
    with_sign(value, &fixed, body)
}

/// de-DE euro: `1.234,50 €` with a no-break space before the symbol.
fn format_currency_eur(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let body = format!("{}\u{a0}€", add_thousands_separator(&fixed, '.', ','));
    with_sign(value, &fixed, body)
}

/// Prefix a minus unless the rounded magnitude is zero.
fn with_sign(value: f64, rounded: &str, body: String) -> String {
    let is_zero = rounded.chars().all(|c| c == '0' || c == '.');
    if value < 0.0 && !is_zero {
        format!("-{}", body)
    } else {
        body
    }
}

/// Group the integer digits of an unsigned decimal string.
fn add_thousands_separator(s: &str, group: char, decimal: char) -> String {
    let (integer_part, decimal_part) = match s.split_once('.') {
        Some((int, dec)) => (int, Some(dec)),
        None => (s, None),
    };

    let len = integer_part.len();
    let mut result = String::with_capacity(len + len / 3 + 4);
    for (i, c) in integer_part.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(group);
        }
        result.push(c);
    }

    if let Some(dec) = decimal_part {
        result.push(decimal);
        result.push_str(dec);
    }

    result
}

//! Small string helpers shared by the audit and filter code.

/// True when the value is absent or only whitespace.
pub fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Trimmed, lowercased form used for case-insensitive comparison.
pub fn fold(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Case-insensitive equality on trimmed values.
pub fn eq_folded(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

//! Phone number normalisation.

/// Reduce a stored number to the digits the connection expects.
///
/// Everything but ASCII digits is dropped. A bare 10-digit national number
/// gets `default_country_code` prepended when one is configured. `None` when
/// no digits remain.
pub fn normalize_number(raw: &str, default_country_code: Option<&str>) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }

    match default_country_code {
        Some(code) if digits.len() == 10 => {
            let code: String = code.chars().filter(char::is_ascii_digit).collect();
            Some(format!("{code}{digits}"))
        },
        _ => Some(digits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting() {
        assert_eq!(
            normalize_number("+44 (20) 7946-0958", None).as_deref(),
            Some("442079460958")
        );
    }

    #[test]
    fn prefixes_national_numbers() {
        assert_eq!(
            normalize_number("555-123-4567", Some("1")).as_deref(),
            Some("15551234567")
        );
        assert_eq!(
            normalize_number("5551234567", Some("+1")).as_deref(),
            Some("15551234567")
        );
        // Already international.
        assert_eq!(
            normalize_number("15551234567", Some("1")).as_deref(),
            Some("15551234567")
        );
        assert_eq!(
            normalize_number("5551234567", None).as_deref(),
            Some("5551234567")
        );
    }

    #[test]
    fn no_digits() {
        assert!(normalize_number("n/a", Some("1")).is_none());
        assert!(normalize_number("", None).is_none());
    }
}

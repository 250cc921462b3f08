//! Numeric literal classification

/// `-?[0-9]+`: optional minus sign followed by at least one digit
pub fn is_integer(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Integer without a sign and without a leading zero
pub fn is_positive_integer(text: &str) -> bool {
    is_integer(text) && !text.starts_with('-') && !text.starts_with('0')
}

/// Exactly one `.`, digits on the fractional side, no trailing bare `.`.
///
/// The integral part may be empty, so `.5` and `-.1` are decimals.
pub fn is_decimal(text: &str) -> bool {
    if text.ends_with('.') {
        return false;
    }

    let body = text.strip_prefix('-').unwrap_or(text);
    match body.split_once('.') {
        Some((integral, fraction)) => {
            !fraction.is_empty()
                && integral.bytes().all(|b| b.is_ascii_digit())
                && fraction.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers() {
        for valid in ["0", "-0", "123", "-45", "007"] {
            assert!(is_integer(valid), "{} should be an integer", valid);
        }
        for invalid in ["12.", "1.2.3", "abc", ".", "-", "", "--1", "+1", "1a", " 1"] {
            assert!(!is_integer(invalid), "{} should not be an integer", invalid);
        }
    }

    #[test]
    fn test_decimals() {
        for valid in ["0.0", "-.1", "00.00", ".5", "-12.75"] {
            assert!(is_decimal(valid), "{} should be a decimal", valid);
        }
        for invalid in ["12.", "1.2.3", "abc", ".", "-", "", "1", "-1.", "1.a"] {
            assert!(!is_decimal(invalid), "{} should not be a decimal", invalid);
        }
    }

    #[test]
    fn test_positive_integers() {
        assert!(is_positive_integer("1"));
        assert!(is_positive_integer("120"));
        assert!(!is_positive_integer("0"));
        assert!(!is_positive_integer("01"));
        assert!(!is_positive_integer("-1"));
        assert!(!is_positive_integer("1.0"));
    }
}

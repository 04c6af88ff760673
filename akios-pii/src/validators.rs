//! Per-pattern validators, ported from `RegexPIIDetector._validate_*`.

pub fn validate_email(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.split('.').all(|part| !part.is_empty())
}

/// Phone numbers are only plausible if most of the candidate is digits.
pub fn validate_phone(candidate: &str) -> bool {
    let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
    let total = candidate.chars().count();
    (7..=15).contains(&digits) && total > 0 && (digits as f64 / total as f64) >= 0.8
}

/// Luhn checksum over the digits of a candidate card number.
pub fn validate_credit_card(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate
        .chars()
        .filter(|c| c.is_ascii_digit())
        .filter_map(|c| c.to_digit(10))
        .collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Structural IBAN check: two letter country code, two check digits,
/// alphanumeric body, 15-34 chars total.
pub fn validate_iban(candidate: &str) -> bool {
    let cleaned: String = candidate.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() < 15 || cleaned.len() > 34 {
        return false;
    }
    let mut chars = cleaned.chars();
    let c1 = chars.next();
    let c2 = chars.next();
    let d1 = chars.next();
    let d2 = chars.next();
    matches!(c1, Some(c) if c.is_ascii_alphabetic())
        && matches!(c2, Some(c) if c.is_ascii_alphabetic())
        && matches!(d1, Some(c) if c.is_ascii_digit())
        && matches!(d2, Some(c) if c.is_ascii_digit())
        && cleaned.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Rejects reserved/loopback ranges and requires each octet in 0..=255.
pub fn validate_ip_address(candidate: &str) -> bool {
    let octets: Vec<&str> = candidate.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    let parsed: Option<Vec<u16>> = octets.iter().map(|o| o.parse::<u16>().ok()).collect();
    let Some(values) = parsed else { return false };
    if !values.iter().all(|&v| v <= 255) {
        return false;
    }
    values[0] != 127 && !(values[0] == 0 && values[1] == 0 && values[2] == 0 && values[3] == 0)
}

/// "lat,lon" with lat in [-90,90] and lon in [-180,180].
pub fn validate_coordinates(candidate: &str) -> bool {
    let Some((lat_s, lon_s)) = candidate.split_once(',') else {
        return false;
    };
    let Ok(lat) = lat_s.trim().parse::<f64>() else {
        return false;
    };
    let Ok(lon) = lon_s.trim().parse::<f64>() else {
        return false;
    };
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luhn_accepts_known_valid_card() {
        assert!(validate_credit_card("4111111111111111"));
    }

    #[test]
    fn luhn_rejects_mangled_card() {
        assert!(!validate_credit_card("4111111111111112"));
    }

    #[test]
    fn phone_rejects_low_digit_density() {
        assert!(!validate_phone("call me at the office please"));
    }

    #[test]
    fn ip_rejects_loopback() {
        assert!(!validate_ip_address("127.0.0.1"));
        assert!(validate_ip_address("8.8.8.8"));
    }

    #[test]
    fn coordinates_reject_out_of_range() {
        assert!(!validate_coordinates("91.0,12.0"));
        assert!(validate_coordinates("48.8566,2.3522"));
    }
}

//! South African national ID validation
//!
//! A SA ID number is 13 digits: `YYMMDD SSSS C A Z` where
//! - `YYMMDD` is the birth date (century ambiguous)
//! - `SSSS` is a gender/sequence number
//! - `C` is the citizenship indicator (0 = citizen, 1 = permanent resident)
//! - `A` is a legacy digit
//! - `Z` is a Luhn check digit over the full number

use serde::Serialize;
use thiserror::Error;

/// National ID validation failure reasons
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum IdNumberError {
    #[error("ID number must be exactly 13 digits")]
    WrongLength,
    #[error("ID number must contain only digits")]
    NonDigit,
    #[error("ID number embeds an invalid birth date")]
    InvalidBirthDate,
    #[error("Citizenship digit must be 0 or 1")]
    InvalidCitizenship,
    #[error("Checksum mismatch")]
    ChecksumMismatch,
}

/// Validate a South African national ID number
///
/// # Examples
///
/// ```
/// use yiba_common::idnum::validate_national_id;
///
/// // Valid number (Luhn-correct, valid embedded date)
/// assert!(validate_national_id("8001015009087").is_ok());
///
/// // Wrong length
/// assert!(validate_national_id("800101500908").is_err());
///
/// // Month 13 is invalid
/// assert!(validate_national_id("8013015009087").is_err());
/// ```
pub fn validate_national_id(id: &str) -> Result<(), IdNumberError> {
    if id.len() != 13 {
        return Err(IdNumberError::WrongLength);
    }
    if !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(IdNumberError::NonDigit);
    }

    let digits: Vec<u32> = id.chars().map(|c| c.to_digit(10).unwrap()).collect();

    // Embedded birth date: YYMMDD, century ambiguous
    let month = digits[2] * 10 + digits[3];
    let day = digits[4] * 10 + digits[5];
    let yy = digits[0] * 10 + digits[1];
    if !is_valid_birth_date(yy, month, day) {
        return Err(IdNumberError::InvalidBirthDate);
    }

    // Citizenship indicator
    if digits[10] > 1 {
        return Err(IdNumberError::InvalidCitizenship);
    }

    // Luhn checksum over all 13 digits
    if luhn_sum(&digits) % 10 != 0 {
        return Err(IdNumberError::ChecksumMismatch);
    }

    Ok(())
}

/// Birth date check with ambiguous century
///
/// The two-digit year could be 19YY or 20YY; the date is accepted when it
/// is valid in either century (matters only for Feb 29).
fn is_valid_birth_date(yy: u32, month: u32, day: u32) -> bool {
    if month < 1 || month > 12 || day < 1 {
        return false;
    }
    let max_day = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap(1900 + yy) || is_leap(2000 + yy) {
                29
            } else {
                28
            }
        }
        _ => unreachable!(),
    };
    day <= max_day
}

fn is_leap(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Standard Luhn sum: double every second digit from the right
fn luhn_sum(digits: &[u32]) -> u32 {
    digits
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
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 8001015009087 is the SARS specimen number; Luhn-valid with a
    // valid embedded date of 1 January 1980.
    const VALID_ID: &str = "8001015009087";

    #[test]
    fn test_valid_id_accepted() {
        assert!(validate_national_id(VALID_ID).is_ok());
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            validate_national_id("80010150090"),
            Err(IdNumberError::WrongLength)
        );
        assert_eq!(
            validate_national_id("80010150090871"),
            Err(IdNumberError::WrongLength)
        );
    }

    #[test]
    fn test_non_digit_rejected() {
        assert_eq!(
            validate_national_id("80010150090a7"),
            Err(IdNumberError::NonDigit)
        );
    }

    #[test]
    fn test_bad_month_rejected() {
        assert_eq!(
            validate_national_id("8013015009087"),
            Err(IdNumberError::InvalidBirthDate)
        );
        assert_eq!(
            validate_national_id("8000015009087"),
            Err(IdNumberError::InvalidBirthDate)
        );
    }

    #[test]
    fn test_bad_day_rejected() {
        // 31 April does not exist
        assert_eq!(
            validate_national_id("8004315009087"),
            Err(IdNumberError::InvalidBirthDate)
        );
    }

    #[test]
    fn test_feb_29_century_ambiguity() {
        // 2000 is a leap year, so 000229... passes the date check even
        // though 1900 was not a leap year. Build a Luhn-valid number.
        let id = with_valid_checksum("000229500908");
        assert!(validate_national_id(&id).is_ok());
    }

    #[test]
    fn test_citizenship_digit_rejected() {
        // Digit 11 (index 10) forced to 5, checksum recomputed so only
        // the citizenship rule can fail.
        let id = with_valid_checksum("800101500958");
        assert_eq!(
            validate_national_id(&id),
            Err(IdNumberError::InvalidCitizenship)
        );
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        // Flip the check digit of a known-good number
        assert_eq!(
            validate_national_id("8001015009086"),
            Err(IdNumberError::ChecksumMismatch)
        );
    }

    /// Append the Luhn check digit to a 12-digit prefix
    fn with_valid_checksum(prefix: &str) -> String {
        assert_eq!(prefix.len(), 12);
        for check in 0..10u32 {
            let candidate = format!("{}{}", prefix, check);
            let digits: Vec<u32> = candidate.chars().map(|c| c.to_digit(10).unwrap()).collect();
            if luhn_sum(&digits) % 10 == 0 {
                return candidate;
            }
        }
        unreachable!("some check digit always satisfies Luhn");
    }
}

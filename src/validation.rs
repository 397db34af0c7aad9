//! Response status validation
//!
//! A validator classifies a response status code as success or failure for
//! the calling application. Rejected responses surface as validation
//! errors that still carry the materialized result.

use http::StatusCode;
use std::ops::RangeInclusive;

use crate::constants::DEFAULT_STATUS_RANGES;
use crate::error::CourierError;

/// A predicate over response status codes
pub trait ResponseValidator: Send + Sync {
    fn is_acceptable(&self, status: StatusCode) -> bool;

    /// Human-readable description of what the validator accepts, used in
    /// error messages
    fn expectation(&self) -> String;
}

/// Accepts status codes inside any of a list of inclusive ranges.
///
/// Parsed from a compact spec string: comma-separated entries, each either
/// a single code (`304`) or an inclusive range (`200..299`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRangeValidator {
    ranges: Vec<RangeInclusive<u16>>,
    spec: String,
}

impl StatusRangeValidator {
    /// Parses a validator from spec syntax, e.g. `"200..299,304"`.
    ///
    /// # Errors
    /// Returns a configuration error for empty specs, non-numeric entries
    /// or inverted ranges.
    pub fn parse(spec: &str) -> Result<Self, CourierError> {
        let mut ranges = Vec::new();
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(CourierError::configuration(format!(
                    "Empty entry in status range spec '{spec}'"
                )));
            }
            let range = match entry.split_once("..") {
                Some((low, high)) => {
                    let low = parse_code(low, spec)?;
                    let high = parse_code(high, spec)?;
                    if low > high {
                        return Err(CourierError::configuration(format!(
                            "Inverted status range '{entry}' in spec '{spec}'"
                        )));
                    }
                    low..=high
                }
                None => {
                    let code = parse_code(entry, spec)?;
                    code..=code
                }
            };
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err(CourierError::configuration(format!(
                "Status range spec '{spec}' contains no ranges"
            )));
        }
        Ok(Self {
            ranges,
            spec: spec.to_string(),
        })
    }

    /// The default acceptance policy: every non-error status
    pub fn default_success() -> Self {
        Self::parse(DEFAULT_STATUS_RANGES)
            .unwrap_or_else(|_| unreachable!("default status range spec is valid"))
    }
}

fn parse_code(value: &str, spec: &str) -> Result<u16, CourierError> {
    value.trim().parse::<u16>().map_err(|_| {
        CourierError::configuration(format!(
            "Invalid status code '{value}' in range spec '{spec}'"
        ))
    })
}

impl Default for StatusRangeValidator {
    fn default() -> Self {
        Self::default_success()
    }
}

impl ResponseValidator for StatusRangeValidator {
    fn is_acceptable(&self, status: StatusCode) -> bool {
        let code = status.as_u16();
        self.ranges.iter().any(|range| range.contains(&code))
    }

    fn expectation(&self) -> String {
        self.spec.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_range() {
        let validator = StatusRangeValidator::parse("200..299").unwrap();
        assert!(validator.is_acceptable(StatusCode::OK));
        assert!(validator.is_acceptable(StatusCode::from_u16(299).unwrap()));
        assert!(!validator.is_acceptable(StatusCode::NOT_FOUND));
        assert!(!validator.is_acceptable(StatusCode::MOVED_PERMANENTLY));
    }

    #[test]
    fn test_parse_ranges_and_single_codes() {
        let validator = StatusRangeValidator::parse("200..299,304").unwrap();
        assert!(validator.is_acceptable(StatusCode::NOT_MODIFIED));
        assert!(!validator.is_acceptable(StatusCode::SEE_OTHER));
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let validator = StatusRangeValidator::parse(" 200 .. 204 , 304 ").unwrap();
        assert!(validator.is_acceptable(StatusCode::NO_CONTENT));
        assert!(validator.is_acceptable(StatusCode::NOT_MODIFIED));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(StatusRangeValidator::parse("abc").is_err());
        assert!(StatusRangeValidator::parse("").is_err());
        assert!(StatusRangeValidator::parse("200..").is_err());
        assert!(StatusRangeValidator::parse("300..200").is_err());
    }

    #[test]
    fn test_default_accepts_non_errors() {
        let validator = StatusRangeValidator::default_success();
        assert!(validator.is_acceptable(StatusCode::OK));
        assert!(validator.is_acceptable(StatusCode::NOT_MODIFIED));
        assert!(!validator.is_acceptable(StatusCode::NOT_FOUND));
        assert!(!validator.is_acceptable(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_expectation_preserves_spec() {
        let validator = StatusRangeValidator::parse("200..299,304").unwrap();
        assert_eq!(validator.expectation(), "200..299,304");
    }
}

//! Human-confirmation token for hardware mutation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A mutating call arrived without a confirmed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("verification missing or not confirmed")]
pub struct SafetyViolation;

/// Confirmation that a human approved a hardware-affecting action
///
/// Constructed fresh for each confirmed action and passed by reference
/// down to every mutating board call; never persisted. The wire names
/// match the front end's JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Whether the confirmation dialog was completed
    pub verified: bool,
    /// Unix timestamp of the confirmation
    pub timestamp: i64,
    /// Whether the user explicitly clicked through the warning
    #[serde(rename = "userConfirmed")]
    pub user_confirmed: bool,
}

impl Verification {
    /// A fully confirmed token, for initialization sequences and tests
    pub fn confirmed(timestamp: i64) -> Self {
        Self {
            verified: true,
            timestamp,
            user_confirmed: true,
        }
    }

    /// Fail unless the token is verified
    pub fn check(&self) -> Result<(), SafetyViolation> {
        if self.verified {
            Ok(())
        } else {
            Err(SafetyViolation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unverified_token_fails_check() {
        let v = Verification {
            verified: false,
            timestamp: 0,
            user_confirmed: false,
        };
        assert_eq!(v.check(), Err(SafetyViolation));

        assert!(Verification::confirmed(1).check().is_ok());
    }

    #[test]
    fn wire_names_are_camel_case() {
        let v: Verification =
            serde_json::from_str(r#"{"verified":true,"timestamp":5,"userConfirmed":true}"#)
                .unwrap();
        assert!(v.verified);
        assert!(v.user_confirmed);
        assert_eq!(v.timestamp, 5);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CODE_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("handoff code must be exactly 6 digits")]
pub struct InvalidHandoffCode;

/// One-time numeric code exchanged between agent and customer at delivery.
///
/// Stored and compared as a fixed-width digit string, so `012345` and
/// `123450` are distinct codes and a five-digit input never parses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HandoffCode(String);

impl HandoffCode {
    pub fn parse(raw: &str) -> Result<Self, InvalidHandoffCode> {
        if raw.len() != CODE_LEN || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidHandoffCode);
        }
        Ok(Self(raw.to_string()))
    }

    /// Random code, zero-padded to the fixed width.
    pub fn generate() -> Self {
        let n = Uuid::new_v4().as_u128() % 1_000_000;
        Self(format!("{n:06}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandoffCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for HandoffCode {
    type Error = InvalidHandoffCode;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<HandoffCode> for String {
    fn from(code: HandoffCode) -> Self {
        code.0
    }
}

//! Human-readable task numbers (`TASK-20250114-3F9A`, `PUT-20250114-00C1`).

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lpnflow_core::DomainError;

/// Prefix family of a task number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumberPrefix {
    /// Tasks created on request through batch creation.
    Batch,
    /// Tasks generated automatically after receipt.
    Putaway,
}

impl NumberPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            NumberPrefix::Batch => "TASK",
            NumberPrefix::Putaway => "PUT",
        }
    }

    fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "TASK" => Some(NumberPrefix::Batch),
            "PUT" => Some(NumberPrefix::Putaway),
            _ => None,
        }
    }
}

/// Task number formatted `{PREFIX}-{yyyyMMdd}-{XXXX}` where `XXXX` is four
/// uppercase hex characters.
///
/// Printed on paper pick lists and scanned in the field, so the format is
/// part of the persisted contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskNumber(String);

impl TaskNumber {
    /// Generate a number for a task created at `at`.
    ///
    /// The suffix comes from the random tail of a UUIDv7, so two numbers
    /// generated on the same day collide with probability 1/65536. The task id
    /// stays the unique key; the number is for humans.
    pub fn generate(prefix: NumberPrefix, at: DateTime<Utc>) -> Self {
        let bytes = Uuid::now_v7().into_bytes();
        Self::from_parts(prefix, at.date_naive(), u16::from_be_bytes([bytes[14], bytes[15]]))
    }

    pub fn from_parts(prefix: NumberPrefix, date: NaiveDate, suffix: u16) -> Self {
        Self(format!(
            "{}-{}-{:04X}",
            prefix.as_str(),
            date.format("%Y%m%d"),
            suffix
        ))
    }

    pub fn parse(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = value.as_ref().trim();
        let invalid = || DomainError::invalid_id(format!("malformed task number '{raw}'"));

        let mut parts = raw.split('-');
        let (Some(prefix), Some(date), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        NumberPrefix::from_str_opt(prefix).ok_or_else(invalid)?;
        if date.len() != 8 || NaiveDate::parse_from_str(date, "%Y%m%d").is_err() {
            return Err(invalid());
        }
        let suffix_ok = suffix.len() == 4
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c));
        if !suffix_ok {
            return Err(invalid());
        }

        Ok(Self(raw.to_string()))
    }

    pub fn prefix(&self) -> NumberPrefix {
        // Constructors guarantee a known prefix.
        if self.0.starts_with("PUT-") {
            NumberPrefix::Putaway
        } else {
            NumberPrefix::Batch
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TaskNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

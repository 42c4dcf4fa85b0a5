//! Trading pair identifier
//!
//! Format: 2 to 4 segments of `[A-Z0-9]` joined by `_`
//! (e.g., "BTC_USD_PERP", "ETH_USD").

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypeError;

const MAX_PAIR_LEN: usize = 32;
const MAX_SEGMENT_LEN: usize = 12;
const MIN_SEGMENTS: usize = 2;
const MAX_SEGMENTS: usize = 4;

/// Validated trading pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pair(String);

impl Pair {
    /// Parse and validate a pair string.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        if raw.is_empty() || raw.len() > MAX_PAIR_LEN {
            return Err(TypeError::InvalidPair(raw.to_string()));
        }

        let segments: Vec<&str> = raw.split('_').collect();
        if !(MIN_SEGMENTS..=MAX_SEGMENTS).contains(&segments.len()) {
            return Err(TypeError::InvalidPair(raw.to_string()));
        }

        let valid = segments.iter().all(|seg| {
            !seg.is_empty()
                && seg.len() <= MAX_SEGMENT_LEN
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        });
        if !valid {
            return Err(TypeError::InvalidPair(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Pair {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Pair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Pair::parse(&raw).map_err(serde::de::Error::custom)
    }
}

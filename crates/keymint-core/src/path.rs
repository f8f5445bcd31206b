//! Change chains and two-level derivation paths.
//!
//! Paths are always relative to the account node: `change/index`, both
//! components non-hardened. The string form ("0/17") doubles as the
//! serde representation so paths can key JSON maps.

use crate::Error;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Indexes with this bit set are hardened and cannot be derived from an
/// xpub.
pub const HARDENED_BIT: u32 = 0x8000_0000;

/// The two BIP-44 chains under an account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    /// Receive chain (`…/0/i`).
    External,
    /// Change chain (`…/1/i`).
    Internal,
}

impl Change {
    /// The chain's child index under the account node.
    pub fn child_index(self) -> u32 {
        match self {
            Change::External => 0,
            Change::Internal => 1,
        }
    }

    pub fn from_child_index(index: u32) -> Result<Self, Error> {
        match index {
            0 => Ok(Change::External),
            1 => Ok(Change::Internal),
            other => Err(Error::UnrecognizedChange(other)),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::External => write!(f, "external"),
            Change::Internal => write!(f, "internal"),
        }
    }
}

/// A `change/index` path under the account node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivationPath {
    pub change: Change,
    pub index: u32,
}

impl DerivationPath {
    /// Build a path, rejecting hardened address indexes.
    pub fn new(change: Change, index: u32) -> Result<Self, Error> {
        if index & HARDENED_BIT != 0 {
            return Err(Error::HardenedIndex(index));
        }
        Ok(DerivationPath { change, index })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.change.child_index(), self.index)
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedPath(s.to_string());
        let (change_part, index_part) = s.split_once('/').ok_or_else(malformed)?;
        let change_index: u32 = change_part.parse().map_err(|_| malformed())?;
        let index: u32 = index_part.parse().map_err(|_| malformed())?;
        let change = Change::from_child_index(change_index)?;
        DerivationPath::new(change, index)
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

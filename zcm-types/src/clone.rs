// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the directory under the external path that holds inactive clones.
pub const CLONES_DIR: &str = ".clones";

/// Identity of a clone: 8 lowercase hexadecimal digits, zero-padded.
///
/// Ids are allocated in strictly increasing order, so ordering by id is the
/// same as ordering by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CloneId(u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid clone id '{0}': expected 8 lowercase hexadecimal digits")]
pub struct ParseCloneIdError(pub String);

impl CloneId {
    /// Id of the clone created by bootstrap
    pub const FIRST: CloneId = CloneId(0);

    /// Number of hex digits in the textual form
    pub const WIDTH: usize = 8;

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// The id allocated after this one, or `None` once the id space is exhausted.
    pub fn next(self) -> Option<CloneId> {
        self.0.checked_add(1).map(CloneId)
    }
}

impl fmt::Display for CloneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl FromStr for CloneId {
    type Err = ParseCloneIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed = s.len() == Self::WIDTH
            && s
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
        if !well_formed {
            return Err(ParseCloneIdError(s.to_string()));
        }

        u32::from_str_radix(s, 16)
            .map(CloneId)
            .map_err(|_| ParseCloneIdError(s.to_string()))
    }
}

impl TryFrom<String> for CloneId {
    type Error = ParseCloneIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CloneId> for String {
    fn from(id: CloneId) -> Self {
        id.to_string()
    }
}

/// One clone dataset under a managed root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedClone {
    pub id: CloneId,

    /// Full dataset name, `{root}/{id}`
    pub dataset: String,

    /// Snapshot this clone was created from, `{parent dataset}@{id}`
    pub origin: Option<String>,

    /// Id of the clone owning `origin`, when that clone belongs to the same root
    pub origin_id: Option<CloneId>,

    pub mountpoint: PathBuf,
    pub mounted: bool,
    pub creation: DateTime<Utc>,
    pub used_bytes: u64,
}

/// Dataset name of clone `id` under `root`.
pub fn clone_dataset_name(root: &str, id: CloneId) -> String {
    format!("{root}/{id}")
}

/// Parse `{root}/{id}` into the clone id, rejecting anything else.
pub fn parse_clone_dataset(root: &str, name: &str) -> Option<CloneId> {
    name.strip_prefix(root)?
        .strip_prefix('/')?
        .parse()
        .ok()
}

/// Id of the clone that owns an origin snapshot `{root}/{id}@{snapshot}`.
pub fn parse_origin_id(root: &str, origin: &str) -> Option<CloneId> {
    let (dataset, _snapshot) = origin.split_once('@')?;
    parse_clone_dataset(root, dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_padded_lowercase() {
        assert_eq!(CloneId::FIRST.to_string(), "00000000");
        assert_eq!(CloneId::new(0xab).to_string(), "000000ab");
        assert_eq!(CloneId::new(u32::MAX).to_string(), "ffffffff");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "0", "0000000", "000000000", "0000000G", "0000000A", "-0000001"] {
            assert!(bad.parse::<CloneId>().is_err(), "{bad} should not parse");
        }
        assert_eq!("0000001f".parse::<CloneId>().unwrap(), CloneId::new(31));
    }

    #[test]
    fn next_stops_at_end_of_id_space() {
        assert_eq!(CloneId::FIRST.next(), Some(CloneId::new(1)));
        assert_eq!(CloneId::new(u32::MAX).next(), None);
    }

    #[test]
    fn parses_clone_dataset_names() {
        let root = "rpool/my/cool/zfs/directory";
        assert_eq!(
            parse_clone_dataset(root, "rpool/my/cool/zfs/directory/00000002"),
            Some(CloneId::new(2))
        );
        assert_eq!(parse_clone_dataset(root, "rpool/my/cool/zfs/directory"), None);
        assert_eq!(parse_clone_dataset(root, "rpool/my/cool/zfs/directoryx/00000002"), None);
        assert_eq!(parse_clone_dataset(root, "rpool/my/cool/zfs/directory/00000002/x"), None);
    }

    #[test]
    fn parses_origin_owner() {
        let root = "tank/zcm";
        assert_eq!(
            parse_origin_id(root, "tank/zcm/00000002@00000001"),
            Some(CloneId::new(2))
        );
        assert_eq!(parse_origin_id(root, "tank/other@00000001"), None);
        assert_eq!(parse_origin_id(root, "tank/zcm/00000002"), None);
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&CloneId::new(10)).unwrap();
        assert_eq!(json, "\"0000000a\"");
        let parsed: CloneId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CloneId::new(10));
        assert!(serde_json::from_str::<CloneId>("\"zz\"").is_err());
    }
}

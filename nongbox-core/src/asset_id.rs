use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for one audio-bearing game asset.
///
/// Two host id spaces are folded into a single signed integer: songs from the
/// remote song service keep their non-negative ids, audio tracks bundled with
/// the game client map to `-(track_index + 1)`. Everything downstream (manifest
/// file names, catalog entries, events) works in the folded space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(i64);

impl AssetId {
    pub fn new(value: i64) -> Self {
        AssetId(value)
    }

    /// Fold a raw host id into the shared id space.
    ///
    /// Every ingress that accepts a raw id together with a built-in flag goes
    /// through here; internal code only ever sees folded ids.
    pub fn adjust(raw: i64, built_in: bool) -> Self {
        if built_in {
            AssetId(-(raw + 1))
        } else {
            AssetId(raw)
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// True when the id encodes a track bundled with the client.
    pub fn is_built_in(&self) -> bool {
        self.0 < 0
    }

    /// Recover the bundled track index for built-in ids.
    pub fn built_in_index(&self) -> Option<i64> {
        if self.is_built_in() {
            Some(-self.0 - 1)
        } else {
            None
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AssetId {
    fn from(value: i64) -> Self {
        AssetId(value)
    }
}

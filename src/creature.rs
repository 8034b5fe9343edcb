use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::CREATURE_CATALOG_SIZE;
use crate::error::SightingError;

/// Identifier of a creature kind in the fixed catalog (1..=151).
///
/// Sightings are keyed by this id in the geospatial index, so the index can
/// hold at most one live sighting per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct CreatureId(u16);

impl CreatureId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = CREATURE_CATALOG_SIZE;

    pub fn new(id: u16) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&id).then_some(Self(id))
    }

    /// Uniform draw over the whole catalog.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(Self::MIN..=Self::MAX))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Key under which sightings of this creature are stored.
    pub fn key(self) -> String {
        self.0.to_string()
    }

    /// Icon name used by the map page.
    pub fn icon(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for CreatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for CreatureId {
    type Error = String;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::new(id).ok_or_else(|| format!("creature id {id} outside {}..={}", Self::MIN, Self::MAX))
    }
}

impl From<CreatureId> for u16 {
    fn from(id: CreatureId) -> Self {
        id.0
    }
}

impl FromStr for CreatureId {
    type Err = SightingError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: String| SightingError::MalformedKey {
            key: key.to_string(),
            reason,
        };
        let id: u16 = key.trim().parse().map_err(|e| malformed(format!("{e}")))?;
        Self::try_from(id).map_err(malformed)
    }
}

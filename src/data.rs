use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::aggregate::{CHANNEL_JOIN, DISTANCE_CHANNEL_PREFIX};

pub use crate::types::{MembraneToken, ParticleClass, SpecimenToken, StackToken};

/// One membrane within a specimen, identified by its filename tokens.
///
/// Ordering is `(membrane, stack)`, which is the order reconciliation emits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembraneKey {
    /// Membrane token (e.g. `M3`).
    pub membrane: MembraneToken,
    /// Stack token (e.g. `S1`).
    pub stack: StackToken,
}

impl MembraneKey {
    /// Build a key from membrane and stack tokens.
    pub fn new(membrane: impl Into<MembraneToken>, stack: impl Into<StackToken>) -> Self {
        Self {
            membrane: membrane.into(),
            stack: stack.into(),
        }
    }
}

impl fmt::Display for MembraneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stack, self.membrane)
    }
}

/// Composite record key: one membrane instance within one specimen/stack.
///
/// Not unique within a table; joins that need disambiguation supply the stack.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Specimen token.
    pub specimen: SpecimenToken,
    /// Stack token.
    pub stack: StackToken,
    /// Membrane token.
    pub membrane: MembraneToken,
}

impl RecordKey {
    /// Build a key from its three tokens.
    pub fn new(
        specimen: impl Into<SpecimenToken>,
        stack: impl Into<StackToken>,
        membrane: impl Into<MembraneToken>,
    ) -> Self {
        Self {
            specimen: specimen.into(),
            stack: stack.into(),
            membrane: membrane.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.specimen, self.stack, self.membrane)
    }
}

/// A distance label target: one particle class, or several classes merged into one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DistanceTarget {
    /// Distance to the nearest particle of one class.
    Single(ParticleClass),
    /// Distance to the nearest particle of any of the listed classes.
    Merged(Vec<ParticleClass>),
}

impl DistanceTarget {
    /// Channel name used in CSV headers (`PSII`, `PSII_UK`).
    pub fn channel_name(&self) -> String {
        match self {
            DistanceTarget::Single(class) => class.clone(),
            DistanceTarget::Merged(classes) => classes.join(CHANNEL_JOIN),
        }
    }

    /// Key of this target's channel in a subvolume store (`dist_PSII_UK`).
    pub fn store_channel(&self) -> String {
        format!("{DISTANCE_CHANNEL_PREFIX}{}", self.channel_name())
    }
}

impl From<&str> for DistanceTarget {
    fn from(value: &str) -> Self {
        DistanceTarget::Single(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_targets_join_merged_classes() {
        let single = DistanceTarget::from("PSII");
        assert_eq!(single.channel_name(), "PSII");
        assert_eq!(single.store_channel(), "dist_PSII");

        let merged = DistanceTarget::Merged(vec!["PSII".into(), "UK".into()]);
        assert_eq!(merged.channel_name(), "PSII_UK");
        assert_eq!(merged.store_channel(), "dist_PSII_UK");
    }

    #[test]
    fn distance_targets_deserialize_from_strings_and_lists() {
        let parsed: Vec<DistanceTarget> =
            serde_json::from_str(r#"[["PSII", "UK"], "b6f"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                DistanceTarget::Merged(vec!["PSII".into(), "UK".into()]),
                DistanceTarget::Single("b6f".into()),
            ]
        );
    }

    #[test]
    fn keys_order_and_display() {
        let mut keys = vec![MembraneKey::new("M2", "S1"), MembraneKey::new("M1", "S2")];
        keys.sort();
        assert_eq!(keys[0].to_string(), "S2/M1");
        assert_eq!(RecordKey::new("Tomo_1", "S1", "M7").to_string(), "Tomo_1/S1/M7");
    }
}

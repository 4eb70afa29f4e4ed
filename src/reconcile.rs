//! Reconciliation of segmentation and annotation identifier sets.

use std::collections::BTreeSet;
use tracing::warn;

use crate::data::MembraneKey;
use crate::errors::IndexError;

/// How much of a specimen's segmented membranes carry annotations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationCoverage {
    /// Every segmented membrane is annotated.
    Full,
    /// Some segmented membranes are annotated.
    Partial,
    /// No membrane is annotated; records are usable for inference only.
    None,
}

/// Outcome of reconciling one specimen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// Authoritative membrane list (deduplicated segmentations, sorted).
    pub membranes: Vec<MembraneKey>,
    /// Annotations that survived filtering, sorted.
    pub annotated: Vec<MembraneKey>,
    /// Annotations dropped because no segmentation exists for them, sorted.
    pub dropped_annotations: Vec<MembraneKey>,
}

impl Reconciliation {
    /// Annotation coverage of the authoritative membrane list.
    pub fn coverage(&self) -> AnnotationCoverage {
        if self.annotated.is_empty() {
            AnnotationCoverage::None
        } else if self.annotated.len() == self.membranes.len() {
            AnnotationCoverage::Full
        } else {
            AnnotationCoverage::Partial
        }
    }
}

/// Reconcile a specimen's segmentation and annotation identifiers.
///
/// Both inputs are deduplicated; annotations without a matching segmentation
/// are dropped. The returned membrane list is always the segmentation set.
pub fn reconcile<S, A>(
    specimen: &str,
    segmentations: S,
    annotations: A,
) -> Result<Reconciliation, IndexError>
where
    S: IntoIterator<Item = MembraneKey>,
    A: IntoIterator<Item = MembraneKey>,
{
    let segmentations: BTreeSet<MembraneKey> = segmentations.into_iter().collect();
    let annotations: BTreeSet<MembraneKey> = annotations.into_iter().collect();

    let (annotated, dropped): (Vec<MembraneKey>, Vec<MembraneKey>) = annotations
        .into_iter()
        .partition(|key| segmentations.contains(key));

    if annotated.len() > segmentations.len() {
        return Err(IndexError::integrity(format!(
            "specimen '{specimen}' has {} annotations but only {} segmentations",
            annotated.len(),
            segmentations.len()
        )));
    }

    for key in &dropped {
        warn!(specimen, membrane = %key, "annotation has no matching segmentation; dropped");
    }

    let result = Reconciliation {
        membranes: segmentations.into_iter().collect(),
        annotated,
        dropped_annotations: dropped,
    };
    match result.coverage() {
        AnnotationCoverage::Full => {}
        AnnotationCoverage::Partial => warn!(
            specimen,
            annotated = result.annotated.len(),
            membranes = result.membranes.len(),
            "specimen is only partially annotated"
        ),
        AnnotationCoverage::None => warn!(
            specimen,
            membranes = result.membranes.len(),
            "specimen has no annotations; records are usable for inference only"
        ),
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn key(membrane: &str, stack: &str) -> MembraneKey {
        MembraneKey::new(membrane, stack)
    }

    #[test]
    fn segmentation_list_is_authoritative_and_orphans_are_dropped() {
        let result = reconcile(
            "Tomo_1",
            [key("M1", "S1"), key("M2", "S1")],
            [key("M1", "S1"), key("M3", "S1")],
        )
        .unwrap();
        assert_eq!(result.membranes, vec![key("M1", "S1"), key("M2", "S1")]);
        assert_eq!(result.annotated, vec![key("M1", "S1")]);
        assert_eq!(result.dropped_annotations, vec![key("M3", "S1")]);
        assert_eq!(result.coverage(), AnnotationCoverage::Partial);
    }

    #[test]
    fn duplicates_collapse_with_set_semantics() {
        let result = reconcile(
            "Tomo_1",
            [key("M2", "S1"), key("M1", "S1"), key("M2", "S1")],
            [key("M1", "S1"), key("M1", "S1"), key("M2", "S1")],
        )
        .unwrap();
        assert_eq!(result.membranes, vec![key("M1", "S1"), key("M2", "S1")]);
        assert_eq!(result.coverage(), AnnotationCoverage::Full);
    }

    #[test]
    fn same_membrane_in_different_stacks_is_distinct() {
        let result = reconcile(
            "Tomo_1",
            [key("M1", "S1"), key("M1", "S2")],
            [key("M1", "S2")],
        )
        .unwrap();
        assert_eq!(result.membranes.len(), 2);
        assert_eq!(result.annotated, vec![key("M1", "S2")]);
    }

    #[test]
    fn missing_annotations_are_not_an_error() {
        let result = reconcile("Tomo_1", [key("M1", "S1")], Vec::new()).unwrap();
        assert_eq!(result.membranes, vec![key("M1", "S1")]);
        assert_eq!(result.coverage(), AnnotationCoverage::None);
    }

    #[test]
    fn annotation_count_never_exceeds_segmentations_for_random_inputs() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let seg_len = rng.random_range(0..8);
            let ann_len = rng.random_range(0..12);
            let segs: Vec<MembraneKey> = (0..seg_len)
                .map(|_| {
                    key(
                        &format!("M{}", rng.random_range(0..6)),
                        &format!("S{}", rng.random_range(0..2)),
                    )
                })
                .collect();
            let anns: Vec<MembraneKey> = (0..ann_len)
                .map(|_| {
                    key(
                        &format!("M{}", rng.random_range(0..6)),
                        &format!("S{}", rng.random_range(0..2)),
                    )
                })
                .collect();
            let result = reconcile("Tomo_r", segs.clone(), anns).unwrap();
            assert!(result.annotated.len() <= result.membranes.len());
            assert!(result.annotated.iter().all(|a| segs.contains(a)));
        }
    }
}

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use membrane_index::constants::columns::{DATA_SPLIT, MEMBRANE, SPECIMEN, STACK};
use membrane_index::{
    IndexError, MembraneKey, OverridePolicy, RecordKey, RecordTable, SplitAssigner, SplitLabel,
    SplitOverrides, SplitRatios, reconcile,
};

fn random_table(rng: &mut StdRng, specimens: usize) -> RecordTable {
    let mut table = RecordTable::new();
    for s in 0..specimens {
        for m in 0..rng.random_range(1..5) {
            table
                .push_row([
                    (SPECIMEN, format!("Tomo_{s}")),
                    (STACK, format!("S{}", rng.random_range(1..3))),
                    (MEMBRANE, format!("M{m}")),
                ])
                .unwrap();
        }
    }
    table
}

#[test]
fn columns_stay_equal_length_under_random_mutations() {
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..50 {
        let mut table = random_table(&mut rng, 4);
        for step in 0..20 {
            let len = if rng.random_bool(0.7) {
                table.len()
            } else {
                rng.random_range(0..table.len() + 3)
            };
            let values = (0..len).map(|idx| format!("v{step}_{idx}")).collect();
            let result = table.set(format!("extra{}", rng.random_range(0..3)), values);
            if len != table.len() {
                assert!(matches!(result, Err(IndexError::ColumnLength { .. })));
            }
            if rng.random_bool(0.2) {
                let row: Vec<(String, String)> = table
                    .column_names()
                    .map(|name| (name.to_string(), format!("{name}_{step}")))
                    .collect();
                table.push_row(row).unwrap();
            }
            table.check_invariants().unwrap();
            for name in table.column_names() {
                assert_eq!(table.get(name).unwrap().len(), table.len());
            }
        }
    }
}

#[test]
fn written_tables_read_back_identically() {
    let temp = tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    for round in 0..10 {
        let mut table = random_table(&mut rng, 3);
        let notes = (0..table.len())
            .map(|idx| {
                if idx % 3 == 0 {
                    String::new()
                } else {
                    format!("note {round} {idx}")
                }
            })
            .collect();
        table.set("notes", notes).unwrap();
        let path = temp.path().join(format!("round_{round}.star"));
        table.write(&path).unwrap();
        assert_eq!(RecordTable::read(&path).unwrap(), table);
    }
}

#[test]
fn split_assignment_respects_overrides_and_grouping_across_seeds() {
    let assigner = SplitAssigner::new(SplitRatios::new(70, 15, 15))
        .unwrap()
        .with_policy(OverridePolicy::StrictTest);
    for seed in 0..30 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut table = random_table(&mut rng, 12);
        let pinned = RecordKey::new(
            "Tomo_3",
            table
                .value(STACK, table.find_row_index("Tomo_3", "M0", None).unwrap())
                .unwrap(),
            "M0",
        );
        let overrides = SplitOverrides::default().with(SplitLabel::Validation, pinned.clone());
        let summary = assigner.assign(&mut table, &overrides, &mut rng).unwrap();

        assert!(summary.specimen_level_validation);
        assert!(summary.specimen_level_test);
        assert_eq!(summary.train + summary.validation + summary.test, table.len());

        let row = table
            .find_row_index(&pinned.specimen, &pinned.membrane, Some(&pinned.stack))
            .unwrap();
        assert_eq!(table.value(DATA_SPLIT, row), Some("val"));

        let mut per_specimen: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (idx, (specimen, label)) in table
            .get(SPECIMEN)
            .unwrap()
            .iter()
            .zip(table.get(DATA_SPLIT).unwrap())
            .enumerate()
        {
            if idx == row {
                continue;
            }
            per_specimen
                .entry(specimen.as_str())
                .or_default()
                .insert(label.as_str());
        }
        for (specimen, labels) in per_specimen {
            assert_eq!(labels.len(), 1, "{specimen} split across {labels:?}");
        }
    }
}

#[test]
fn reconciled_annotations_are_a_subset_of_segmentations() {
    let mut rng = StdRng::seed_from_u64(21);
    for _ in 0..100 {
        let draw = |rng: &mut StdRng| {
            MembraneKey::new(
                format!("M{}", rng.random_range(0..8)),
                format!("S{}", rng.random_range(0..3)),
            )
        };
        let segmentations: Vec<MembraneKey> =
            (0..rng.random_range(0..10)).map(|_| draw(&mut rng)).collect();
        let annotations: Vec<MembraneKey> =
            (0..rng.random_range(0..10)).map(|_| draw(&mut rng)).collect();
        let result = reconcile("Tomo_r", segmentations.clone(), annotations.clone()).unwrap();

        let unique: HashSet<&MembraneKey> = segmentations.iter().collect();
        assert_eq!(result.membranes.len(), unique.len());
        assert!(result.annotated.len() <= result.membranes.len());
        for key in &result.annotated {
            assert!(result.membranes.contains(key));
        }
        for key in &result.dropped_annotations {
            assert!(annotations.contains(key));
            assert!(!unique.contains(key));
        }
    }
}

use hwam::calibrate::{
    bottom_up_top_down_row, parent_boost_row, CalibrationMode, Calibrator, HierarchyIndex,
};
use hwam::matrix::AffinityMatrix;
use hwam::taxonomy::{CategoryRecord, TaxonomyError, TaxonomyTree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// root -> {a, b}; a -> {a1, a2}; b -> {b1}
fn three_level_tree() -> TaxonomyTree {
    TaxonomyTree::build(&[
        CategoryRecord::new("root", "Root", None),
        CategoryRecord::new("a", "A", Some("root")),
        CategoryRecord::new("b", "B", Some("root")),
        CategoryRecord::new("a1", "A1", Some("a")),
        CategoryRecord::new("a2", "A2", Some("a")),
        CategoryRecord::new("b1", "B1", Some("b")),
    ])
    .unwrap()
}

fn random_matrix(tree: &TaxonomyTree, rows: usize, seed: u64) -> AffinityMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..rows * tree.len()).map(|_| rng.gen_range(0.0..=1.0)).collect();
    let row_ids = (0..rows).map(|r| format!("attr{r}")).collect();
    let col_ids = tree.ids().map(str::to_string).collect();
    AffinityMatrix::from_row_major(row_ids, col_ids, &values).unwrap()
}

#[test]
fn two_level_worked_example() {
    let tree = TaxonomyTree::build(&[
        CategoryRecord::new("root", "Root", None),
        CategoryRecord::new("A", "A", Some("root")),
        CategoryRecord::new("B", "B", Some("root")),
    ])
    .unwrap();
    let index = HierarchyIndex::new(&tree, &ids(&["root", "A", "B"])).unwrap();
    let out = bottom_up_top_down_row(&[0.2, 0.8, 0.4], &index, 0.5, 0.5);
    assert!(approx_eq(out[0], 0.5, 1e-6));
    assert!(approx_eq(out[1], 0.6, 1e-6));
    assert!(approx_eq(out[2], 0.3, 1e-6));
}

#[test]
fn zero_alpha_and_beta_is_identity() {
    let tree = three_level_tree();
    let base = random_matrix(&tree, 8, 7);
    let calibrator = Calibrator::new(CalibrationMode::BottomUpTopDown {
        alpha: 0.0,
        beta: 0.0,
    })
    .unwrap();
    let out = calibrator.calibrate(&base, &tree).unwrap();
    assert_eq!(out, base);
}

#[test]
fn full_alpha_lifts_parents_to_max_descendant() {
    let tree = three_level_tree();
    let cols = ids(&["root", "a", "b", "a1", "a2", "b1"]);
    let index = HierarchyIndex::new(&tree, &cols).unwrap();
    let base = [0.1, 0.2, 0.3, 0.4, 0.9, 0.5];

    // beta = 0 isolates the bottom-up pass.
    let out = bottom_up_top_down_row(&base, &index, 1.0, 0.0);
    assert!(approx_eq(out[1], 0.9, 1e-6)); // a = max(a1, a2)
    assert!(approx_eq(out[2], 0.5, 1e-6)); // b = b1
    assert!(approx_eq(out[0], 0.9, 1e-6)); // root = max(a, b) recursively
    assert_eq!(&out[3..], &base[3..]);
}

#[test]
fn column_order_does_not_change_results() {
    let tree = three_level_tree();
    let natural = ids(&["root", "a", "b", "a1", "a2", "b1"]);
    let shuffled = ids(&["b1", "a2", "root", "b", "a1", "a"]);
    let base = [0.3, 0.7, 0.2, 0.6, 0.1, 0.8];
    let by_id = |cols: &[String], row: &[f32], id: &str| {
        row[cols.iter().position(|c| c == id).unwrap()]
    };
    let shuffled_base: Vec<f32> = shuffled.iter().map(|id| by_id(&natural, &base, id.as_str())).collect();

    let a = bottom_up_top_down_row(
        &base,
        &HierarchyIndex::new(&tree, &natural).unwrap(),
        0.5,
        0.7,
    );
    let b = bottom_up_top_down_row(
        &shuffled_base,
        &HierarchyIndex::new(&tree, &shuffled).unwrap(),
        0.5,
        0.7,
    );
    for id in &natural {
        assert!(approx_eq(
            by_id(&natural, &a, id.as_str()),
            by_id(&shuffled, &b, id.as_str()),
            1e-6
        ));
    }
}

#[test]
fn zero_gamma_is_identity() {
    let tree = three_level_tree();
    let base = random_matrix(&tree, 5, 11);
    let out = Calibrator::new(CalibrationMode::ParentBoost { gamma: 0.0 })
        .unwrap()
        .calibrate(&base, &tree)
        .unwrap();
    assert_eq!(out, base);
}

#[test]
fn full_gamma_adds_parent_base_score() {
    let tree = three_level_tree();
    let cols = ids(&["root", "a", "b", "a1", "a2", "b1"]);
    let index = HierarchyIndex::new(&tree, &cols).unwrap();
    let base = [0.1, 0.2, 0.7, 0.4, 0.9, 0.5];
    let out = parent_boost_row(&base, &index, 1.0);

    assert!(approx_eq(out[0], 0.1, 1e-6));
    assert!(approx_eq(out[1], 0.3, 1e-6)); // a + root
    assert!(approx_eq(out[3], 0.6, 1e-6)); // a1 + base a, not boosted a
    assert!(approx_eq(out[4], 1.0, 1e-6)); // min(1, 0.9 + 0.2)
    assert!(approx_eq(out[5], 1.0, 1e-6)); // min(1, 0.5 + 0.7)
}

#[test]
fn outputs_stay_in_unit_interval() {
    let tree = three_level_tree();
    let base = random_matrix(&tree, 64, 42);
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..10 {
        let mode = if rng.gen_bool(0.5) {
            CalibrationMode::BottomUpTopDown {
                alpha: rng.gen_range(0.0..=1.0),
                beta: rng.gen_range(0.0..=1.0),
            }
        } else {
            CalibrationMode::ParentBoost {
                gamma: rng.gen_range(0.0..=1.0),
            }
        };
        let out = Calibrator::new(mode).unwrap().calibrate(&base, &tree).unwrap();
        assert!(out.is_unit_bounded());
        assert_eq!(out.row_ids(), base.row_ids());
        assert_eq!(out.col_ids(), base.col_ids());
    }
}

#[test]
fn evidence_driven_parents_ignore_parent_base_scores() {
    let tree = three_level_tree();
    let cols = ids(&["root", "a", "b", "a1", "a2", "b1"]);
    let row_ids = ids(&["x"]);
    let high = AffinityMatrix::from_row_major(
        row_ids.clone(),
        cols.clone(),
        &[0.9, 0.9, 0.9, 0.4, 0.6, 0.5],
    )
    .unwrap();
    let low = AffinityMatrix::from_row_major(row_ids, cols, &[0.0, 0.1, 0.2, 0.4, 0.6, 0.5])
        .unwrap();

    let calibrator = Calibrator::new(CalibrationMode::BottomUpTopDown {
        alpha: 0.5,
        beta: 0.7,
    })
    .unwrap()
    .with_evidence_driven_parents(true);

    let a = calibrator.calibrate(&high, &tree).unwrap();
    let b = calibrator.calibrate(&low, &tree).unwrap();
    assert_eq!(a, b);
    // a = 0.5 * 0 + 0.5 * max(0.4, 0.6)
    assert!(approx_eq(a.get(0, 1).unwrap(), 0.3 * (0.7 * a.get(0, 0).unwrap() + 0.3), 1e-6));
}

#[test]
fn evidence_driven_parents_is_ignored_in_boost_mode() {
    let tree = three_level_tree();
    let base = random_matrix(&tree, 4, 5);
    let plain = Calibrator::new(CalibrationMode::ParentBoost { gamma: 0.3 }).unwrap();
    let zeroing = plain.clone().with_evidence_driven_parents(true);
    assert_eq!(
        plain.calibrate(&base, &tree).unwrap(),
        zeroing.calibrate(&base, &tree).unwrap()
    );
}

#[test]
fn invalid_parameters_are_rejected() {
    assert!(Calibrator::new(CalibrationMode::BottomUpTopDown {
        alpha: 1.2,
        beta: 0.5
    })
    .is_err());
    assert!(Calibrator::new(CalibrationMode::ParentBoost { gamma: -0.1 }).is_err());
}

#[test]
fn unknown_column_is_an_error() {
    let tree = three_level_tree();
    let m = AffinityMatrix::from_row_major(ids(&["x"]), ids(&["root", "zzz"]), &[0.5, 0.5])
        .unwrap();
    let calibrator = Calibrator::new(CalibrationMode::ParentBoost { gamma: 0.2 }).unwrap();
    assert!(calibrator.calibrate(&m, &tree).is_err());
}

#[test]
fn duplicate_column_is_an_error() {
    let tree = three_level_tree();
    let cols = ids(&["root", "a", "a"]);
    assert_eq!(
        HierarchyIndex::new(&tree, &cols).unwrap_err(),
        TaxonomyError::DuplicateColumn { id: "a".to_string() }
    );

    let m = AffinityMatrix::from_row_major(ids(&["x"]), cols, &[0.2, 0.9, 0.1]).unwrap();
    let calibrator = Calibrator::new(CalibrationMode::BottomUpTopDown {
        alpha: 0.5,
        beta: 0.7,
    })
    .unwrap();
    assert!(calibrator.calibrate(&m, &tree).is_err());
}

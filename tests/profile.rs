use std::collections::HashMap;

use hwam::matrix::AffinityMatrix;
use hwam::profile::{self, Profile};

fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn matrix() -> AffinityMatrix {
    // rows: a, b; cols: x, y, z
    AffinityMatrix::from_row_major(
        ids(&["a", "b"]),
        ids(&["x", "y", "z"]),
        &[1.0, 0.0, 0.5, 0.0, 1.0, 0.5],
    )
    .unwrap()
}

#[test]
fn projection_is_profile_weighted_mean() {
    let mut p = Profile::default();
    p.set("a", 255);
    p.set("b", 0);
    let t = profile::project(&matrix(), &p);
    assert_eq!(t, vec![1.0, 0.0, 0.5]);
}

#[test]
fn missing_attributes_default_to_midpoint() {
    let p = Profile::default();
    assert_eq!(p.value("anything"), 128);
    let t = profile::project(&matrix(), &p);
    // equal weights -> plain column means
    assert!((t[0] - 0.5).abs() < 1e-6);
    assert!((t[1] - 0.5).abs() < 1e-6);
    assert!((t[2] - 0.5).abs() < 1e-6);
}

#[test]
fn all_zero_profile_projects_to_zero() {
    let p = Profile::new(HashMap::from([("a".to_string(), 0), ("b".to_string(), 0)]));
    assert!(profile::project(&matrix(), &p).iter().all(|&v| v == 0.0));
}

#[test]
fn fit_averages_known_columns_only() {
    let mut p = Profile::default();
    p.set("a", 255);
    p.set("b", 0);
    let m = matrix();
    assert!((profile::fit(&m, &p, &ids(&["x", "z", "missing"])) - 0.75).abs() < 1e-6);
    assert_eq!(profile::fit(&m, &p, &ids(&["missing"])), 0.0);
    assert_eq!(profile::fit(&m, &p, &[]), 0.0);
}

#[test]
fn ranked_projection_masks_excluded_columns() {
    let mut p = Profile::default();
    p.set("a", 255);
    p.set("b", 51);
    let ranked = profile::ranked_projection(&matrix(), &p, &ids(&["x"]), None);
    let order: Vec<&str> = ranked.iter().map(|r| r.category_id.as_str()).collect();
    assert_eq!(order, vec!["z", "y"]);

    let top1 = profile::ranked_projection(&matrix(), &p, &[], Some(1));
    assert_eq!(top1.len(), 1);
    assert_eq!(top1[0].category_id, "x");
}

#[test]
fn profile_parses_from_plain_json_object() {
    let p: Profile = serde_json::from_str(r#"{"a": 10, "b": 200}"#).unwrap();
    assert_eq!(p.value("a"), 10);
    assert_eq!(p.value("b"), 200);
    assert_eq!(p.value("c"), 128);
}

use hwam::taxonomy::{CategoryRecord, DepthDirection, TaxonomyError, TaxonomyTree};
use tempfile::tempdir;

fn food_tree() -> TaxonomyTree {
    TaxonomyTree::build(&[
        CategoryRecord::new("c1", "Food", None),
        CategoryRecord::new("c2", "Snacks", Some("c1")),
        CategoryRecord::new("c3", "Chips", Some("c2")),
        CategoryRecord::new("c4", "Drinks", Some("c1")),
        CategoryRecord::new("m1", "Music", None),
    ])
    .unwrap()
}

#[test]
fn depths_and_paths_follow_parent_links() {
    let tree = TaxonomyTree::build(&[
        CategoryRecord::new("c1", "Food", None),
        CategoryRecord::new("c2", "Snacks", Some("c1")),
    ])
    .unwrap();
    assert_eq!(tree.depth("c1").unwrap(), 0);
    assert_eq!(tree.depth("c2").unwrap(), 1);
    assert_eq!(tree.full_path("c2").unwrap(), vec!["Food", "Snacks"]);
    assert_eq!(tree.path_string("c2", " > ").unwrap(), "Food > Snacks");
}

#[test]
fn structure_queries() {
    let tree = food_tree();
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.roots().collect::<Vec<_>>(), vec!["c1", "m1"]);
    assert_eq!(tree.parent_of("c3").unwrap(), Some("c2"));
    assert_eq!(tree.parent_of("c1").unwrap(), None);
    assert_eq!(tree.children_of("c1").unwrap(), vec!["c2", "c4"]);
    assert!(tree.is_leaf("c3").unwrap());
    assert!(tree.is_leaf("m1").unwrap());
    assert!(!tree.is_leaf("c2").unwrap());
    assert_eq!(tree.max_depth(), 2);
}

#[test]
fn depth_order_is_monotonic_both_ways() {
    let tree = food_tree();

    let down: Vec<usize> = tree
        .nodes_by_depth(DepthDirection::RootToLeaves)
        .map(|id| tree.depth(id).unwrap())
        .collect();
    assert_eq!(down.len(), 5);
    assert!(down.windows(2).all(|w| w[0] <= w[1]));

    let up: Vec<usize> = tree
        .nodes_by_depth(DepthDirection::LeavesToRoot)
        .map(|id| tree.depth(id).unwrap())
        .collect();
    assert!(up.windows(2).all(|w| w[0] >= w[1]));

    // Restartable: a second traversal yields the same sequence.
    let again: Vec<&str> = tree.nodes_by_depth(DepthDirection::RootToLeaves).collect();
    let first: Vec<&str> = tree.nodes_by_depth(DepthDirection::RootToLeaves).collect();
    assert_eq!(first, again);
}

#[test]
fn duplicate_ids_fail_fast() {
    let err = TaxonomyTree::build(&[
        CategoryRecord::new("a", "A", None),
        CategoryRecord::new("a", "A again", None),
    ])
    .unwrap_err();
    assert_eq!(err, TaxonomyError::DuplicateId { id: "a".to_string() });
}

#[test]
fn unknown_node_lookups_fail() {
    let tree = food_tree();
    assert!(matches!(
        tree.depth("nope"),
        Err(TaxonomyError::UnknownNode { .. })
    ));
    assert!(matches!(
        tree.full_path("nope"),
        Err(TaxonomyError::UnknownNode { .. })
    ));
    assert!(matches!(
        tree.children_of("nope"),
        Err(TaxonomyError::UnknownNode { .. })
    ));
}

#[test]
fn dangling_parent_is_a_root_unless_strict() {
    let records = vec![
        CategoryRecord::new("a", "A", None),
        CategoryRecord::new("orphan", "Orphan", Some("ghost")),
        CategoryRecord::new("kid", "Kid", Some("orphan")),
    ];

    let tree = TaxonomyTree::build(&records).unwrap();
    assert_eq!(tree.depth("orphan").unwrap(), 0);
    assert_eq!(tree.depth("kid").unwrap(), 1);
    assert_eq!(tree.parent_of("orphan").unwrap(), None);
    assert_eq!(
        tree.node("orphan").unwrap().parent_id.as_deref(),
        Some("ghost")
    );
    assert_eq!(tree.dangling_parents().count(), 1);
    assert_eq!(tree.full_path("kid").unwrap(), vec!["Orphan", "Kid"]);

    let err = TaxonomyTree::build_strict(&records).unwrap_err();
    assert_eq!(
        err,
        TaxonomyError::DanglingParent {
            id: "orphan".to_string(),
            parent_id: "ghost".to_string(),
        }
    );
}

#[test]
fn loads_from_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("taxonomy.json");
    std::fs::write(
        &path,
        r#"[
            {"id": "c1", "name": "Food", "parent_id": null},
            {"id": "c2", "name": "Snacks", "parent_id": "c1"},
            {"id": "c3", "name": "Music"}
        ]"#,
    )
    .unwrap();
    let tree = TaxonomyTree::from_json_file(&path, true).unwrap();
    assert_eq!(tree.ids().collect::<Vec<_>>(), vec!["c1", "c2", "c3"]);
    assert_eq!(tree.depth("c2").unwrap(), 1);
}

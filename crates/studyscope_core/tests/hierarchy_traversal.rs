mod common;

use common::{build_study_tree, codes, ctx, Fixture, StudyTree, DAY, T0};
use std::collections::HashSet;
use studyscope_core::{ErrorKind, HierarchyError, Scope, ScopeRepository, SqliteScopeRepository};

fn all_scopes(tree: &StudyTree) -> Vec<&Scope> {
    vec![&tree.study, &tree.at, &tree.ct, &tree.ct2, &tree.patient]
}

fn id_set(scopes: &[Scope]) -> HashSet<uuid::Uuid> {
    scopes.iter().map(|scope| scope.uuid).collect()
}

#[test]
fn ancestors_follow_default_chain_nearest_first() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0);

    assert_eq!(
        codes(&service.get_ancestors(&tree.patient).unwrap()),
        vec!["AT-01", "AT", "STUDY"]
    );
    assert!(service.get_ancestors(&tree.study).unwrap().is_empty());
    assert_eq!(service.get_default_parent(&tree.patient).unwrap().uuid, tree.ct.uuid);

    let err = service.get_default_parent(&tree.study).unwrap_err();
    assert!(matches!(err, HierarchyError::DefaultParentMissing(id) if id == tree.study.uuid));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn transfer_scenario_reshapes_every_view() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let transfer_date = T0 + 10 * DAY;
    let service = fixture.relations(transfer_date);

    service
        .transfer(&tree.patient, &tree.ct2, transfer_date, &ctx())
        .unwrap();

    assert_eq!(
        codes(&service.get_ancestors(&tree.patient).unwrap()),
        vec!["AT-02", "AT", "STUDY"]
    );
    assert_eq!(
        codes(&service.get_all_parents(&tree.patient).unwrap()),
        vec!["AT-01", "AT-02"]
    );
    assert_eq!(service.get_default_parent(&tree.patient).unwrap().uuid, tree.ct2.uuid);
    assert!(!service.is_child_of(&tree.patient, &tree.ct).unwrap());
    assert!(service.is_child_of(&tree.patient, &tree.ct2).unwrap());
    assert!(service.is_parent_of(&tree.ct2, &tree.patient).unwrap());

    assert!(service.get_children(&tree.ct).unwrap().iter().any(|c| c.uuid == tree.patient.uuid));
    assert!(service.get_enabled_children(&tree.ct, transfer_date).unwrap().is_empty());
    assert_eq!(
        codes(&service.get_enabled_children(&tree.ct, T0 + DAY).unwrap()),
        vec!["AT-01-001"]
    );

    assert_eq!(
        id_set(&service.get_all_ancestors(&tree.patient).unwrap()),
        id_set(&[
            tree.ct.clone(),
            tree.ct2.clone(),
            tree.at.clone(),
            tree.study.clone()
        ])
    );
    assert_eq!(
        codes(&service.get_enabled_ancestors(&tree.patient, None).unwrap()),
        vec!["AT-02", "AT", "STUDY"]
    );
    assert!(!service.is_descendant_of_enabled(&tree.patient, &tree.ct).unwrap());
    assert!(service.is_descendant_of_enabled(&tree.patient, &tree.at).unwrap());
}

#[test]
fn predicates_agree_with_ancestor_enumeration() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0 + 10 * DAY);
    service
        .transfer(&tree.patient, &tree.ct2, T0 + 10 * DAY, &ctx())
        .unwrap();

    for scope in all_scopes(&tree) {
        let ancestors = id_set(&service.get_ancestors(scope).unwrap());
        for other in all_scopes(&tree) {
            let descendant = service.is_descendant_of(scope, other).unwrap();
            assert_eq!(descendant, ancestors.contains(&other.uuid), "{} / {}", scope.code, other.code);
            assert_eq!(service.is_ancestor_of(other, scope).unwrap(), descendant);

            let related = service.are_related(scope, other).unwrap();
            let expected = scope.uuid == other.uuid
                || descendant
                || service.is_descendant_of(other, scope).unwrap();
            assert_eq!(related, expected);
        }
    }
    assert!(!service.are_related(&tree.ct, &tree.ct2).unwrap());
    assert!(!service.is_descendant_of(&tree.patient, &tree.ct).unwrap());
}

#[test]
fn shortest_distance_walks_up_or_down_the_full_graph() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0 + 10 * DAY);

    assert_eq!(service.get_shortest_distance_between(&tree.patient, &tree.patient).unwrap(), 0);
    assert_eq!(service.get_shortest_distance_between(&tree.patient, &tree.study).unwrap(), 3);
    assert_eq!(service.get_shortest_distance_between(&tree.study, &tree.patient).unwrap(), 3);
    assert_eq!(service.get_shortest_distance_between(&tree.at, &tree.ct2).unwrap(), 1);

    let err = service
        .get_shortest_distance_between(&tree.ct, &tree.ct2)
        .unwrap_err();
    assert!(matches!(err, HierarchyError::NotRelated { .. }));
    assert_eq!(err.kind(), ErrorKind::NotRelated);

    service
        .transfer(&tree.patient, &tree.ct2, T0 + 10 * DAY, &ctx())
        .unwrap();
    // The ended relation to the first center still counts as an edge.
    assert_eq!(service.get_shortest_distance_between(&tree.patient, &tree.ct).unwrap(), 1);
}

#[test]
fn shortest_distance_matches_scopes_by_key_not_by_instance() {
    let fixture = Fixture::new();
    build_study_tree(&fixture);
    let service = fixture.relations(T0);

    let patient = fixture.reload("AT-01-001");
    let study_by_code = fixture.reload("STUDY");
    let study_by_key = SqliteScopeRepository::try_new(&fixture.conn)
        .unwrap()
        .get_scope(study_by_code.uuid)
        .unwrap()
        .unwrap();

    assert_eq!(service.get_shortest_distance_between(&patient, &study_by_code).unwrap(), 3);
    assert_eq!(service.get_shortest_distance_between(&patient, &study_by_key).unwrap(), 3);
    assert_eq!(service.get_shortest_distance_between(&study_by_key, &patient).unwrap(), 3);
}

#[test]
fn deleted_parents_are_hidden_from_non_historical_views() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0);
    SqliteScopeRepository::try_new(&fixture.conn)
        .unwrap()
        .delete_scope(tree.ct.uuid, &ctx(), "closed site")
        .unwrap();

    assert!(service.get_parents(&tree.patient).unwrap().is_empty());
    assert_eq!(codes(&service.get_all_parents(&tree.patient).unwrap()), vec!["AT-01"]);
    assert!(service.get_enabled_parents(&tree.patient, T0).unwrap().is_empty());
    assert!(service.get_non_deleted_parent_relations(&tree.patient).unwrap().is_empty());

    // The default still resolves through the deleted parent.
    let default_parent = service.get_default_parent(&tree.patient).unwrap();
    assert_eq!(default_parent.uuid, tree.ct.uuid);
    assert!(default_parent.is_deleted);
    assert!(matches!(
        service.get_default_parent_relation(&tree.patient),
        Err(HierarchyError::DefaultParentMissing(_))
    ));

    assert_eq!(codes(&service.get_ancestors(&tree.patient).unwrap()), vec!["AT", "STUDY"]);
    assert!(service.get_descendants(&tree.at, Some("PATIENT")).unwrap().iter().any(|s| s.uuid == tree.patient.uuid));
    assert_eq!(codes(&service.get_children(&tree.at).unwrap()), vec!["AT-02"]);
    assert_eq!(service.get_all_children(&tree.at).unwrap().len(), 2);
}

#[test]
fn virtual_memberships_are_enabled_whatever_their_dates() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let cohort = fixture.create("COHORT-A", "COHORT", Some(&tree.study));
    let service = fixture.relations(T0);

    let membership = service
        .create_relation(&tree.patient, &cohort, T0 + 50 * DAY, Some(T0 + 60 * DAY), &ctx(), "enrol")
        .unwrap();

    let enabled = service.get_enabled_parents(&tree.patient, T0).unwrap();
    assert_eq!(codes(&enabled), vec!["AT-01", "COHORT-A"]);
    assert!(service.is_child_of(&tree.patient, &cohort).unwrap());
    assert_eq!(
        service
            .get_active_relation(&tree.patient, &cohort)
            .unwrap()
            .map(|relation| relation.uuid),
        Some(membership.uuid)
    );
    assert_eq!(
        service.get_active_child_relations(&cohort, T0 + 100 * DAY).unwrap().len(),
        1
    );
    assert_eq!(service.get_parent(&membership).unwrap().uuid, cohort.uuid);
    assert_eq!(service.get_child(&membership).unwrap().uuid, tree.patient.uuid);
}

#[test]
fn descendant_queries_filter_by_model_and_agree_when_all_relations_are_open() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0 + DAY);

    let all = service.get_descendants(&tree.study, None).unwrap();
    assert_eq!(
        id_set(&all),
        id_set(&[tree.at.clone(), tree.ct.clone(), tree.ct2.clone(), tree.patient.clone()])
    );
    assert_eq!(
        codes(&service.get_descendants(&tree.study, Some("PATIENT")).unwrap()),
        vec!["AT-01-001"]
    );

    let enabled = service.get_enabled_descendants(&tree.study, None).unwrap();
    assert_eq!(id_set(&enabled), id_set(&all));
    assert_eq!(codes(&enabled[..1]), vec!["AT"]);

    let centers = service.get_enabled_descendants(&tree.study, Some("CENTER")).unwrap();
    let mut center_codes = codes(&centers);
    center_codes.sort_unstable();
    assert_eq!(center_codes, vec!["AT-01", "AT-02"]);
}

#[test]
fn enabled_descendants_drop_ended_relations() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0 + 10 * DAY);
    service
        .transfer(&tree.patient, &tree.ct2, T0 + 10 * DAY, &ctx())
        .unwrap();

    assert!(service.get_enabled_descendants(&tree.ct, None).unwrap().is_empty());
    assert_eq!(codes(&service.get_descendants(&tree.ct, None).unwrap()), vec!["AT-01-001"]);
    assert_eq!(
        codes(&service.get_enabled_descendants(&tree.ct2, Some("PATIENT")).unwrap()),
        vec!["AT-01-001"]
    );
    assert_eq!(
        service.get_active_parent_relations(&tree.patient, T0 + 10 * DAY).unwrap().len(),
        1
    );
    assert_eq!(service.get_child_relations(&tree.ct).unwrap().len(), 1);
    assert_eq!(service.get_non_deleted_child_relations(&tree.ct2).unwrap().len(), 1);
}

#[test]
fn siblings_share_a_parent_and_exclude_the_scope() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0);

    assert_eq!(codes(&service.get_all_siblings(&tree.ct).unwrap()), vec!["AT-02"]);
    assert!(service.get_all_siblings(&tree.study).unwrap().is_empty());
}

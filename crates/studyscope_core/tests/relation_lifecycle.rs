mod common;

use common::{assert_single_default, build_study_tree, codes, ctx, Fixture, DAY, T0};
use studyscope_core::repo::audit_repo::list_audit_entries;
use studyscope_core::{
    ErrorKind, HierarchyError, RelationEnding, RelationRepository, ScopeRepository,
    SqliteRelationRepository, SqliteScopeRepository,
};

#[test]
fn first_relation_is_default_and_later_ones_are_not() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0);

    let default = service.get_default_parent_relation(&tree.patient).unwrap();
    assert_eq!(default.parent_uuid, tree.ct.uuid);
    assert_eq!(default.start_date, T0);
    assert_eq!(default.end_date, None);

    let cohort = fixture.create("COHORT-A", "COHORT", Some(&tree.study));
    let membership = service
        .create_relation(&tree.patient, &cohort, T0, None, &ctx(), "enrol")
        .unwrap();
    assert!(!membership.is_default);
    assert_single_default(&fixture);

    let defaults = service
        .get_all_parent_relations(&tree.patient)
        .unwrap()
        .into_iter()
        .filter(|relation| relation.is_default)
        .count();
    assert_eq!(defaults, 1);
}

#[test]
fn make_default_moves_the_flag() {
    let fixture = Fixture::new();
    let study = fixture.create("STUDY", "STUDY", None);
    let at = fixture.create("AT", "COUNTRY", Some(&study));
    let ch = fixture.create("CH", "COUNTRY", Some(&study));
    let ct = fixture.create("AT-01", "CENTER", Some(&at));
    let service = fixture.relations(T0 + DAY);

    let second = service
        .create_relation(&ct, &ch, T0, None, &ctx(), "shared center")
        .unwrap();
    assert_single_default(&fixture);
    let promoted = service.make_default(&second, &ctx(), "switch").unwrap();
    assert!(promoted.is_default);
    assert_single_default(&fixture);

    let relations = service.get_all_parent_relations(&ct).unwrap();
    let defaults: Vec<_> = relations.iter().filter(|r| r.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].parent_uuid, ch.uuid);
    assert_eq!(service.get_default_parent(&ct).unwrap().uuid, ch.uuid);
}

#[test]
fn create_relation_rejects_deleted_and_locked_endpoints() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let scopes = SqliteScopeRepository::try_new(&fixture.conn).unwrap();
    let service = fixture.relations(T0);
    let cohort = fixture.create("COHORT-A", "COHORT", Some(&tree.study));

    scopes.delete_scope(cohort.uuid, &ctx(), "gone").unwrap();
    let err = service
        .create_relation(&tree.patient, &cohort, T0, None, &ctx(), "enrol")
        .unwrap_err();
    assert!(matches!(err, HierarchyError::ScopeDeleted(id) if id == cohort.uuid));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    scopes.restore_scope(cohort.uuid, &ctx(), "back").unwrap();
    let mut patient = fixture.reload("AT-01-001");
    patient.is_locked = true;
    scopes.save_scope(&patient, &ctx(), "lock").unwrap();

    // Stale value still says unlocked; the stored row wins.
    let err = service
        .create_relation(&tree.patient, &cohort, T0, None, &ctx(), "enrol")
        .unwrap_err();
    assert!(matches!(err, HierarchyError::ScopeLocked(id) if id == tree.patient.uuid));
}

#[test]
fn create_relation_rejects_active_child_and_overlapping_window() {
    let fixture = Fixture::new();
    let study = fixture.create("STUDY", "STUDY", None);
    let at = fixture.create("AT", "COUNTRY", Some(&study));
    let ch = fixture.create("CH", "COUNTRY", Some(&study));
    let ct = fixture.create("AT-01", "CENTER", Some(&at));
    let relations = SqliteRelationRepository::try_new(&fixture.conn).unwrap();
    let service = fixture.relations(T0 + 20 * DAY);

    let err = service
        .create_relation(&ct, &at, T0 + DAY, None, &ctx(), "again")
        .unwrap_err();
    assert!(matches!(err, HierarchyError::AlreadyChild { .. }));
    assert_eq!(err.kind(), ErrorKind::RelationConflict);

    let mut ended = service
        .create_relation(&ct, &ch, T0, Some(T0 + 10 * DAY), &ctx(), "temporary")
        .unwrap();
    assert!(!ended.is_default);

    let err = service
        .create_relation(&ct, &ch, T0 + 5 * DAY, None, &ctx(), "overlap")
        .unwrap_err();
    assert!(matches!(err, HierarchyError::WindowOverlap { .. }));

    let adjacent = service
        .create_relation(&ct, &ch, T0 + 10 * DAY, None, &ctx(), "adjacent")
        .unwrap();
    assert_eq!(adjacent.start_date, T0 + 10 * DAY);
    assert_single_default(&fixture);

    ended = relations.get_relation(ended.uuid).unwrap().unwrap();
    assert_eq!(ended.end_date, Some(T0 + 10 * DAY));
}

#[test]
fn create_relation_rejects_incompatible_models_without_writing() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0);

    let err = service
        .create_relation(&tree.patient, &tree.at, T0, None, &ctx(), "skip center")
        .unwrap_err();
    assert!(matches!(
        &err,
        HierarchyError::IncompatibleModels { child_model, parent_model }
            if child_model == "PATIENT" && parent_model == "COUNTRY"
    ));
    assert_eq!(err.kind(), ErrorKind::ConfigurationViolation);
    assert_eq!(service.get_all_parent_relations(&tree.patient).unwrap().len(), 1);
    assert_single_default(&fixture);
}

#[test]
fn create_relation_rejects_inverted_window() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let cohort = fixture.create("COHORT-A", "COHORT", Some(&tree.study));
    let err = fixture
        .relations(T0)
        .create_relation(&tree.patient, &cohort, T0 + DAY, Some(T0), &ctx(), "bad")
        .unwrap_err();
    assert!(matches!(err, HierarchyError::EndBeforeStart { .. }));
}

#[test]
fn end_relation_refuses_default_and_soft_ends_physical_relations() {
    let fixture = Fixture::new();
    let study = fixture.create("STUDY", "STUDY", None);
    let at = fixture.create("AT", "COUNTRY", Some(&study));
    let ch = fixture.create("CH", "COUNTRY", Some(&study));
    let ct = fixture.create("AT-01", "CENTER", Some(&at));
    let service = fixture.relations(T0 + DAY);

    let default = service.get_default_parent_relation(&ct).unwrap();
    let err = service
        .end_relation(&default, T0 + 2 * DAY, &ctx(), "close")
        .unwrap_err();
    assert!(matches!(err, HierarchyError::DefaultRelationEnd(id) if id == default.uuid));

    let secondary = service
        .create_relation(&ct, &ch, T0, None, &ctx(), "shared")
        .unwrap();
    let ending = service
        .end_relation(&secondary, T0 + 3 * DAY, &ctx(), "close")
        .unwrap();
    match ending {
        RelationEnding::SoftEnded(relation) => {
            assert_eq!(relation.end_date, Some(T0 + 3 * DAY));
        }
        other => panic!("unexpected ending: {other:?}"),
    }
    let stored = service.get_relation(secondary.uuid).unwrap();
    assert_eq!(stored.end_date, Some(T0 + 3 * DAY));

    // Shortening is allowed, extending past the current end is not.
    service
        .end_relation(&stored, T0 + 2 * DAY, &ctx(), "shorten")
        .unwrap();
    let err = service
        .end_relation(&stored, T0 + 5 * DAY, &ctx(), "extend")
        .unwrap_err();
    assert!(matches!(
        err,
        HierarchyError::RelationAlreadyEnded { end_date, .. } if end_date == T0 + 2 * DAY
    ));
    assert_single_default(&fixture);

    let err = service
        .end_relation(&stored, T0 - DAY, &ctx(), "before start")
        .unwrap_err();
    assert!(matches!(err, HierarchyError::EndBeforeStart { .. }));
}

#[test]
fn end_relation_hard_deletes_virtual_memberships() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let cohort = fixture.create("COHORT-A", "COHORT", Some(&tree.study));
    let service = fixture.relations(T0);

    let membership = service
        .create_relation(&tree.patient, &cohort, T0, None, &ctx(), "enrol")
        .unwrap();
    assert!(service.is_virtual(&membership).unwrap());

    let ending = service
        .end_relation(&membership, T0 + DAY, &ctx(), "leave cohort")
        .unwrap();
    assert!(matches!(ending, RelationEnding::HardDeleted(_)));
    assert_single_default(&fixture);

    let err = service.get_relation(membership.uuid).unwrap_err();
    assert!(matches!(err, HierarchyError::RelationNotFound(id) if id == membership.uuid));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let trail = list_audit_entries(&fixture.conn, membership.uuid).unwrap();
    let actions: Vec<&str> = trail.iter().map(|entry| entry.action.as_str()).collect();
    assert_eq!(actions, vec!["create", "hard_delete"]);
}

#[test]
fn make_default_rejects_virtual_and_future_relations() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let cohort = fixture.create("COHORT-A", "COHORT", Some(&tree.study));
    let ch = fixture.create("CH", "COUNTRY", Some(&tree.study));
    let service = fixture.relations(T0 + DAY);

    let membership = service
        .create_relation(&tree.patient, &cohort, T0, None, &ctx(), "enrol")
        .unwrap();
    let err = service.make_default(&membership, &ctx(), "promote").unwrap_err();
    assert!(matches!(err, HierarchyError::VirtualRelationDefault(_)));
    assert_eq!(err.kind(), ErrorKind::RelationConflict);

    let future = service
        .create_relation(&tree.ct, &ch, T0 + 30 * DAY, None, &ctx(), "planned")
        .unwrap();
    let err = service.make_default(&future, &ctx(), "promote").unwrap_err();
    assert!(matches!(err, HierarchyError::DefaultStartsInFuture(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let default = service.get_default_parent_relation(&tree.ct).unwrap();
    assert_eq!(default.parent_uuid, tree.at.uuid);
    assert_single_default(&fixture);
}

#[test]
fn transfer_moves_default_lineage_and_keeps_history() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let transfer_date = T0 + 10 * DAY;
    let service = fixture.relations(transfer_date);
    let previous = service.get_default_parent_relation(&tree.patient).unwrap();

    let relation = service
        .transfer(&tree.patient, &tree.ct2, transfer_date, &ctx())
        .unwrap();
    assert!(relation.is_default);
    assert_eq!(relation.parent_uuid, tree.ct2.uuid);
    assert_eq!(relation.start_date, transfer_date);

    let previous = service.get_relation(previous.uuid).unwrap();
    assert!(!previous.is_default);
    assert_eq!(previous.end_date, Some(transfer_date));
    assert_single_default(&fixture);

    assert_eq!(
        codes(&service.get_ancestors(&tree.patient).unwrap()),
        vec!["AT-02", "AT", "STUDY"]
    );
    assert_eq!(
        codes(&service.get_enabled_parents(&tree.patient, T0 + DAY).unwrap()),
        vec!["AT-01"]
    );
    assert_eq!(
        codes(&service.get_enabled_parents(&tree.patient, transfer_date).unwrap()),
        vec!["AT-02"]
    );

    let trail = list_audit_entries(&fixture.conn, previous.uuid).unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.action, "update");
    assert_eq!(last.rationale, "Scope transfer");
    assert_eq!(last.actor, "tester");
}

#[test]
fn failed_transfer_leaves_previous_relation_untouched() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0 + 10 * DAY);
    let previous = service.get_default_parent_relation(&tree.patient).unwrap();

    let err = service
        .transfer(&tree.patient, &tree.at, T0 + 10 * DAY, &ctx())
        .unwrap_err();
    assert!(matches!(err, HierarchyError::IncompatibleModels { .. }));

    let reloaded = service.get_relation(previous.uuid).unwrap();
    assert_eq!(reloaded, previous);
    assert_single_default(&fixture);
    assert_eq!(service.get_all_parent_relations(&tree.patient).unwrap().len(), 1);
    assert_eq!(
        codes(&service.get_ancestors(&tree.patient).unwrap()),
        vec!["AT-01", "AT", "STUDY"]
    );
}

#[test]
fn transfer_before_current_start_is_rejected() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0 + DAY);
    let err = service
        .transfer(&tree.patient, &tree.ct2, T0 - DAY, &ctx())
        .unwrap_err();
    assert!(matches!(err, HierarchyError::EndBeforeStart { .. }));
    assert!(service.get_default_parent_relation(&tree.patient).unwrap().end_date.is_none());
}

#[test]
fn transfer_dated_after_now_is_rejected() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let service = fixture.relations(T0 + DAY);
    let err = service
        .transfer(&tree.patient, &tree.ct2, T0 + 5 * DAY, &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        HierarchyError::TransferInFuture { scope, transfer_date }
            if scope == tree.patient.uuid && transfer_date == T0 + 5 * DAY
    ));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(
        service.get_default_parent(&tree.patient).unwrap().uuid,
        tree.ct.uuid
    );
    assert_single_default(&fixture);
}

#[test]
fn scope_under_deleted_default_parent_can_be_rehomed() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let scopes = fixture.scopes(T0 + DAY);
    let service = scopes.relations();
    let stale = service.get_default_parent_relation(&tree.patient).unwrap();

    assert!(scopes.delete(&tree.ct, &ctx(), "site closed").unwrap());
    assert_single_default(&fixture);

    let rehomed = service
        .create_relation(&tree.patient, &tree.ct2, T0 + DAY, None, &ctx(), "rehome")
        .unwrap();
    assert!(rehomed.is_default);
    assert!(!service.get_relation(stale.uuid).unwrap().is_default);
    assert_single_default(&fixture);
    assert_eq!(
        codes(&service.get_ancestors(&tree.patient).unwrap()),
        vec!["AT-02", "AT", "STUDY"]
    );

    scopes.restore(&tree.ct, &ctx(), "site reopened").unwrap();
    let restored = service.make_default(&stale, &ctx(), "back home").unwrap();
    assert!(restored.is_default);
    assert!(!service.get_relation(rehomed.uuid).unwrap().is_default);
    assert_single_default(&fixture);

    let ct3 = fixture.create("AT-03", "CENTER", Some(&tree.at));
    let moved = service
        .transfer(&tree.patient, &ct3, T0 + DAY, &ctx())
        .unwrap();
    assert!(moved.is_default);
    assert_eq!(
        service.get_relation(stale.uuid).unwrap().end_date,
        Some(T0 + DAY)
    );
    assert_single_default(&fixture);
    assert_eq!(service.get_default_parent(&tree.patient).unwrap().uuid, ct3.uuid);
}

#[test]
fn transfer_ends_default_relation_to_deleted_parent() {
    let fixture = Fixture::new();
    let tree = build_study_tree(&fixture);
    let transfer_date = T0 + 10 * DAY;
    let scopes = fixture.scopes(transfer_date);
    let service = scopes.relations();
    let stale = service.get_default_parent_relation(&tree.patient).unwrap();

    assert!(scopes.delete(&tree.ct, &ctx(), "site closed").unwrap());
    let relation = service
        .transfer(&tree.patient, &tree.ct2, transfer_date, &ctx())
        .unwrap();
    assert!(relation.is_default);

    let stale = service.get_relation(stale.uuid).unwrap();
    assert!(!stale.is_default);
    assert_eq!(stale.end_date, Some(transfer_date));
    assert_single_default(&fixture);
    assert_eq!(
        service.get_default_parent_relation(&tree.patient).unwrap().uuid,
        relation.uuid
    );
}

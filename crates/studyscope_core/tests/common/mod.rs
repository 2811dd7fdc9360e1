#![allow(dead_code)]

use rusqlite::Connection;
use studyscope_core::db::open_db_in_memory;
use studyscope_core::{
    AuditContext, FixedClock, Scope, ScopeModelCatalog, ScopeRelationService, ScopeService,
    SqliteRelationRepository, SqliteScopeRepository, Timestamp,
};

pub const DAY: Timestamp = 86_400_000;
pub const T0: Timestamp = 1_700_000_000_000;

pub const STUDY_CATALOG: &str = r#"{
    "scope_models": [
        { "id": "STUDY" },
        { "id": "COUNTRY", "parent_ids": ["STUDY"], "default_parent_id": "STUDY" },
        { "id": "CENTER", "parent_ids": ["COUNTRY"], "default_parent_id": "COUNTRY" },
        { "id": "COHORT", "parent_ids": ["STUDY"], "default_parent_id": "STUDY", "virtual": true },
        {
            "id": "PATIENT",
            "parent_ids": ["CENTER", "COHORT"],
            "default_parent_id": "CENTER",
            "max_number": 100
        }
    ]
}"#;

pub type Relations<'a> =
    ScopeRelationService<'a, SqliteScopeRepository<'a>, SqliteRelationRepository<'a>, FixedClock>;
pub type Scopes<'a> =
    ScopeService<'a, SqliteScopeRepository<'a>, SqliteRelationRepository<'a>, FixedClock>;

pub struct Fixture {
    pub conn: Connection,
    pub catalog: ScopeModelCatalog,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_catalog(STUDY_CATALOG)
    }

    pub fn with_catalog(json: &str) -> Self {
        Self {
            conn: open_db_in_memory().unwrap(),
            catalog: ScopeModelCatalog::from_json_str(json).unwrap(),
        }
    }

    pub fn relations(&self, now: Timestamp) -> Relations<'_> {
        ScopeRelationService::with_clock(
            SqliteScopeRepository::try_new(&self.conn).unwrap(),
            SqliteRelationRepository::try_new(&self.conn).unwrap(),
            &self.catalog,
            FixedClock(now),
        )
    }

    pub fn scopes(&self, now: Timestamp) -> Scopes<'_> {
        ScopeService::new(self.relations(now))
    }

    /// Creates a scope at `T0`, under `parent` when given.
    pub fn create(&self, code: &str, model: &str, parent: Option<&Scope>) -> Scope {
        let mut scope = Scope::new(code, model, T0);
        scope.is_virtual = self.catalog.get(model).unwrap().is_virtual;
        self.scopes(T0)
            .create(&scope, parent, &ctx(), "seed")
            .unwrap()
    }

    /// Reloads a scope by code as a fresh value.
    pub fn reload(&self, code: &str) -> Scope {
        use studyscope_core::ScopeRepository;
        SqliteScopeRepository::try_new(&self.conn)
            .unwrap()
            .get_scope_by_code(code)
            .unwrap()
            .unwrap()
    }
}

/// STUDY -> AT -> {CT, CT2}, with patient P under CT.
pub struct StudyTree {
    pub study: Scope,
    pub at: Scope,
    pub ct: Scope,
    pub ct2: Scope,
    pub patient: Scope,
}

pub fn build_study_tree(fixture: &Fixture) -> StudyTree {
    let study = fixture.create("STUDY", "STUDY", None);
    let at = fixture.create("AT", "COUNTRY", Some(&study));
    let ct = fixture.create("AT-01", "CENTER", Some(&at));
    let ct2 = fixture.create("AT-02", "CENTER", Some(&at));
    let patient = fixture.create("AT-01-001", "PATIENT", Some(&ct));
    StudyTree {
        study,
        at,
        ct,
        ct2,
        patient,
    }
}

pub fn ctx() -> AuditContext {
    AuditContext::new("tester").with_origin("integration-test")
}

/// Asserts every scope with parent relations has exactly one default row.
pub fn assert_single_default(fixture: &Fixture) {
    let mut stmt = fixture
        .conn
        .prepare(
            "SELECT scope_uuid, SUM(is_default) FROM scope_relations
             GROUP BY scope_uuid
             HAVING SUM(is_default) <> 1",
        )
        .unwrap();
    let broken: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(broken.is_empty(), "scopes without exactly one default: {broken:?}");
}

pub fn codes(scopes: &[Scope]) -> Vec<&str> {
    scopes.iter().map(|scope| scope.code.as_str()).collect()
}

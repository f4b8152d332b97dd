//! Registration and initialization tests.
//!
//! Tests verify that:
//! - Registering an entity twice on the same bind changes nothing
//! - Registering it again on a different bind is a conflict
//! - Types sharing a name in different modules are separate entities
//! - Two-phase initialization matches one-phase construction

mod common;

use alchemical::{Alchemical, BindKey, EngineOptions, Entity, EntityDef, Error, Options};
use common::{Note, User1, physical_tables, sqlite_url};

#[test]
fn test_register_same_bind_is_idempotent() {
    let db = Alchemical::new();
    db.register::<User1>().unwrap();
    let before = db.registry().tables_for_bind(&BindKey::named("one"));

    db.register::<User1>().unwrap();
    let after = db.registry().tables_for_bind(&BindKey::named("one"));

    assert_eq!(before.len(), 1);
    assert_eq!(before, after);
}

#[test]
fn test_register_conflicting_bind() {
    let db = Alchemical::new();
    db.register::<User1>().unwrap();

    let moved = User1::definition().bind("two");
    let err = db.register_entity(moved).unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }), "{err}");
    assert!(db.metadata("two").is_none());
}

#[test]
fn test_registration_before_initialize() {
    let mut db = Alchemical::new();
    db.register::<Note>().unwrap();
    db.register::<User1>().unwrap();
    assert!(!db.is_initialized());

    db.initialize(Options::new().url("sqlite://").bind("one", "sqlite://"))
        .unwrap();
    db.create_all().unwrap();

    assert_eq!(db.existing_tables(BindKey::Default).unwrap(), Some(vec!["note".to_string()]));
    assert_eq!(db.existing_tables("one").unwrap(), Some(vec!["user1".to_string()]));
}

#[test]
fn test_two_phase_initialization_matches_one_phase() {
    let engine_options = EngineOptions {
        echo: Some(true),
        acquire_timeout_secs: Some(5),
        ..Default::default()
    };

    let one_phase = Alchemical::with_options(
        Options::new()
            .url("sqlite://")
            .engine_options(engine_options.clone()),
    )
    .unwrap();
    one_phase.register::<Note>().unwrap();

    let mut two_phase = Alchemical::new();
    two_phase.register::<Note>().unwrap();
    two_phase
        .initialize(
            Options::new()
                .url("sqlite://")
                .engine_options(engine_options),
        )
        .unwrap();

    let a = one_phase.get_engine(BindKey::Default).unwrap().unwrap();
    let b = two_phase.get_engine(BindKey::Default).unwrap().unwrap();
    assert_eq!(a.options(), b.options());
    assert_eq!(a.url(), b.url());
    assert!(a.echo());

    let tables = |db: &Alchemical| -> Vec<String> {
        db.metadata(BindKey::Default)
            .map(|m| m.tables().iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    };
    assert_eq!(tables(&one_phase), tables(&two_phase));
    assert_eq!(one_phase.bind_names(), two_phase.bind_names());
}

#[test]
fn test_shared_registry_through_options() {
    let first = Alchemical::new();
    first.register::<Note>().unwrap();

    let second = Alchemical::with_options(
        Options::new()
            .url("sqlite://")
            .registry(first.registry().clone()),
    )
    .unwrap();
    assert!(second.metadata(BindKey::Default).is_some());

    second
        .register_entity(EntityDef::new("Extra"))
        .unwrap();
    assert_eq!(first.registry().metadatas().len(), 1);
    assert_eq!(first.metadata(BindKey::Default).unwrap().tables().len(), 2);
}

mod blog {
    use alchemical::{Column, Entity, EntityDef};

    pub struct User;

    impl Entity for User {
        fn definition() -> EntityDef {
            EntityDef::of::<User>()
                .table("users_blog")
                .column(Column::integer("id").primary_key())
        }
    }
}

mod shop {
    use alchemical::{Column, Entity, EntityDef};

    pub struct User;

    impl Entity for User {
        fn definition() -> EntityDef {
            EntityDef::of::<User>()
                .table("users_shop")
                .column(Column::integer("id").primary_key())
        }
    }
}

#[test]
fn test_same_type_name_in_two_modules_creates_both_tables() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(dir.path(), "app.db");
    let db = Alchemical::with_options(Options::new().url(&url)).unwrap();

    assert_eq!(db.register::<blog::User>().unwrap().name, "users_blog");
    assert_eq!(db.register::<shop::User>().unwrap().name, "users_shop");
    db.create_all().unwrap();

    assert_eq!(
        physical_tables(&url),
        vec!["users_blog".to_string(), "users_shop".to_string()]
    );
}

#[test]
fn test_same_type_name_in_two_modules_on_different_binds() {
    let db = Alchemical::new();
    db.register_entity(blog::User::definition().bind("one"))
        .unwrap();
    db.register_entity(shop::User::definition().bind("two"))
        .unwrap();
    assert_eq!(db.metadata("two").unwrap().tables().len(), 1);
}

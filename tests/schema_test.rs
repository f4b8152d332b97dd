//! create_all / drop_all tests.

mod common;

use alchemical::{
    Alchemical, AsyncAlchemical, BindKey, Column, Entity, EntityDef, Error, NamingConvention,
    Options, Session, insert,
};
use common::{Note, User1, count_rows, physical_tables, sqlite_url};

#[test]
fn test_drop_all_then_query_fails() {
    let db = Alchemical::with_options(Options::new().url("sqlite://").bind("one", "sqlite://"))
        .unwrap();
    db.register::<Note>().unwrap();
    db.register::<User1>().unwrap();
    db.create_all().unwrap();
    db.drop_all().unwrap();

    let mut session = db.session().unwrap();
    let err = session.fetch_all(Note::select()).unwrap_err();
    assert!(err.is_missing_table(), "{err}");
    assert!(matches!(err, Error::Driver(_)));
    session.close().unwrap();

    let mut session = db.session().unwrap();
    let err = session.fetch_all(User1::select()).unwrap_err();
    assert!(err.is_missing_table(), "{err}");
}

#[test]
fn test_create_all_twice_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(dir.path(), "app.db");
    let db = Alchemical::with_options(Options::new().url(&url)).unwrap();
    db.register::<Note>().unwrap();
    db.create_all().unwrap();

    db.begin(|session: &mut Session| session.add(&Note::new("survivor")))
        .unwrap();
    db.create_all().unwrap();

    assert_eq!(count_rows(&url, "note"), 1);
}

#[test]
fn test_drop_all_leaves_foreign_tables() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(dir.path(), "app.db");
    let db = Alchemical::with_options(Options::new().url(&url)).unwrap();
    db.register::<Note>().unwrap();
    db.create_all().unwrap();

    let other = Alchemical::with_options(Options::new().url(&url)).unwrap();
    other
        .register_entity(EntityDef::new("Unmanaged").column(Column::integer("id")))
        .unwrap();
    other.create_all().unwrap();

    db.drop_all().unwrap();
    assert_eq!(physical_tables(&url), vec!["unmanaged".to_string()]);
}

#[test]
fn test_foreign_keys_and_drop_order() {
    let db = Alchemical::with_options(Options::new().url("sqlite://")).unwrap();
    db.register_entity(
        EntityDef::new("Author")
            .column(Column::integer("id").primary_key())
            .column(Column::string("name", 64).not_null().unique()),
    )
    .unwrap();
    db.register_entity(
        EntityDef::new("Book")
            .column(Column::integer("id").primary_key())
            .column(Column::integer("author_id").references("author", "id").index())
            .check(Some("title_len"), "length(title) > 0")
            .column(Column::string("title", 200).not_null()),
    )
    .unwrap();

    db.create_all().unwrap();
    assert_eq!(
        db.existing_tables(BindKey::Default).unwrap(),
        Some(vec!["author".to_string(), "book".to_string()])
    );
    db.drop_all().unwrap();
    assert_eq!(db.existing_tables(BindKey::Default).unwrap(), Some(vec![]));
}

#[test]
fn test_referenced_table_registered_last() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(dir.path(), "library.db");
    let db = Alchemical::with_options(Options::new().url(&url)).unwrap();
    db.register_entity(
        EntityDef::new("Book")
            .column(Column::integer("id").primary_key())
            .column(Column::integer("author_id").references("author", "id"))
            .column(Column::string("title", 200).not_null()),
    )
    .unwrap();
    db.register_entity(
        EntityDef::new("Author")
            .column(Column::integer("id").primary_key())
            .column(Column::string("name", 64).not_null()),
    )
    .unwrap();
    db.create_all().unwrap();

    db.begin(|session: &mut Session| {
        session.execute(insert("author").value("id", 1i64).value("name", "Le Guin"))?;
        session.execute(
            insert("book")
                .value("author_id", 1i64)
                .value("title", "The Dispossessed"),
        )?;
        Ok::<_, Error>(())
    })
    .unwrap();
    assert_eq!(count_rows(&url, "book"), 1);

    db.drop_all().unwrap();
    assert!(physical_tables(&url).is_empty());
}

#[test]
fn test_create_all_skips_binds_without_engine() {
    let db = Alchemical::with_options(Options::new().url("sqlite://")).unwrap();
    db.register::<Note>().unwrap();
    db.register::<User1>().unwrap();
    db.create_all().unwrap();
    assert_eq!(
        db.existing_tables(BindKey::Default).unwrap(),
        Some(vec!["note".to_string()])
    );
}

#[test]
fn test_index_name_without_convention() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(dir.path(), "app.db");
    let db = Alchemical::with_options(
        Options::new()
            .url(&url)
            .naming_convention(NamingConvention::none()),
    )
    .unwrap();
    db.register_entity(
        EntityDef::new("Tag").column(Column::string("label", 32).index()),
    )
    .unwrap();
    db.create_all().unwrap();

    let mut session = db.session().unwrap();
    let count: Option<i64> = session
        .scalar(alchemical::text(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'ix_tag_label'",
        ))
        .unwrap();
    assert_eq!(count, Some(1));
}

#[tokio::test]
async fn test_async_create_and_drop() {
    let db = AsyncAlchemical::with_options(Options::new().url("sqlite://").bind("one", "sqlite://"))
        .unwrap();
    db.register::<Note>().unwrap();
    db.register::<User1>().unwrap();
    db.create_all().await.unwrap();

    let mut session = db.session().unwrap();
    assert!(session.fetch_all(User1::select()).await.unwrap().is_empty());
    session.close().await.unwrap();

    db.drop_all().await.unwrap();
    let mut session = db.session().unwrap();
    let err = session.fetch_all(User1::select()).await.unwrap_err();
    assert!(err.is_missing_table(), "{err}");
}

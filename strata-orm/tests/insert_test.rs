mod common;

use serde_json::json;
use strata_orm::{ApiFlags, Collection, Field, Op, Orm, QueryContext, Registry};

#[tokio::test]
async fn test_insert_returning() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let inserted = orm
        .insert_into("products")
        .value(common::record(json!({ "name": "  Chair  ", "price": 49.5 })))
        .returning(&["*"])
        .run_one()
        .await
        .expect_data("insert")
        .expect("returned row");

    assert_eq!(inserted["id"], json!(1));
    // The trim sanitizer ran before storage.
    assert_eq!(inserted["name"], json!("Chair"));
    // Defaults fill fields the caller omitted.
    assert_eq!(inserted["active"], json!(true));
    assert_eq!(inserted["language"], json!("en"));

    Ok(())
}

#[tokio::test]
async fn test_insert_without_returning_writes_rows() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let rows = orm
        .insert_into("products")
        .value(common::record(json!({ "name": "Desk", "price": 120.0 })))
        .run()
        .await
        .expect_data("insert");
    assert!(rows.is_empty());

    let count = orm.select_from("products").count().await.expect_data("count");
    assert_eq!(count, 1);

    Ok(())
}

#[tokio::test]
async fn test_required_and_unknown_fields() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let errors = orm
        .insert_into("products")
        .value(common::record(json!({ "price": 10.0, "flavor": "sweet" })))
        .run_one()
        .await
        .input_errors()
        .expect("input errors");

    assert_eq!(errors["name"], "This field is required");
    assert_eq!(errors["flavor"], "Unknown field");

    // Nothing was persisted.
    let count = orm.select_from("products").count().await.expect_data("count");
    assert_eq!(count, 0);

    Ok(())
}

#[tokio::test]
async fn test_bulk_errors_align_by_row() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let outcome = orm
        .insert_into("products")
        .values(vec![
            common::record(json!({ "name": "Chair" })),
            common::record(json!({ "price": 3.0 })),
            common::record(json!({ "name": "Desk" })),
        ])
        .run()
        .await;

    let errors = outcome.input_errors().expect("batch errors");
    assert_eq!(errors.len(), 3);
    assert!(errors[0].is_empty());
    assert_eq!(errors[1]["name"], "This field is required");
    assert!(errors[2].is_empty());

    // One bad row fails the whole batch.
    let count = orm.select_from("products").count().await.expect_data("count");
    assert_eq!(count, 0);

    Ok(())
}

#[tokio::test]
async fn test_run_one_rejects_batches() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let outcome = orm
        .insert_into("products")
        .values(vec![
            common::record(json!({ "name": "Chair" })),
            common::record(json!({ "name": "Desk" })),
        ])
        .run_one()
        .await;
    assert!(outcome.runtime_error().is_some());

    Ok(())
}

#[tokio::test]
async fn test_explicit_ids_are_all_or_none() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let outcome = orm
        .insert_into("products")
        .values(vec![
            common::record(json!({ "id": 10, "name": "Chair" })),
            common::record(json!({ "name": "Desk" })),
        ])
        .run()
        .await;
    assert!(outcome.runtime_error().is_some());

    // With ids on every row the insert goes through.
    let rows = orm
        .insert_into("products")
        .values(vec![
            common::record(json!({ "id": 10, "name": "Chair" })),
            common::record(json!({ "id": 11, "name": "Desk" })),
        ])
        .returning(&["id", "name"])
        .run()
        .await
        .expect_data("explicit ids");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], json!(10));
    assert_eq!(rows[1]["id"], json!(11));

    Ok(())
}

#[tokio::test]
async fn test_context_language_wins_over_field_default() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let inserted = orm
        .insert_into("products")
        .value(common::record(json!({ "name": "Stuhl" })))
        .with_context(QueryContext::new().with_language("de"))
        .returning(&["*"])
        .run_one()
        .await
        .expect_data("insert")
        .expect("returned row");
    assert_eq!(inserted["language"], json!("de"));

    Ok(())
}

#[tokio::test]
async fn test_empty_insert_is_a_runtime_error() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let outcome = orm.insert_into("products").run().await;
    assert!(outcome.runtime_error().is_some());

    Ok(())
}

#[tokio::test]
async fn test_insert_populates_returned_rows() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    orm.insert_into("users")
        .value(common::record(json!({ "name": "alice" })))
        .run()
        .await
        .expect_data("insert user");

    let inserted = orm
        .insert_into("posts")
        .value(common::record(json!({ "title": "hello", "author": 1 })))
        .returning(&["*"])
        .populate(&["author"])
        .run_one()
        .await
        .expect_data("insert post")
        .expect("returned row");

    assert_eq!(inserted["author"], json!({ "id": 1, "name": "alice" }));

    // The raw foreign id is still what got stored.
    let raw = orm
        .select_from("posts")
        .where_("id", Op::Eq, 1)
        .first()
        .await
        .expect_data("reread")
        .expect("row");
    assert_eq!(raw["author"], json!(1));

    Ok(())
}

#[tokio::test]
async fn test_insert_rejected_when_creation_is_disabled() -> Result<(), Box<dyn std::error::Error>>
{
    let db = common::connect().await?;
    db.raw("CREATE TABLE logs (id INTEGER PRIMARY KEY AUTOINCREMENT, entry TEXT)")
        .execute()
        .await?;
    let registry = Registry::builder()
        .collection(
            Collection::builder("logs")
                .field("entry", Field::text())
                .api(ApiFlags { create: false, ..ApiFlags::default() })
                .build(),
        )
        .build();
    let orm = Orm::new(db, registry);

    let outcome = orm
        .insert_into("logs")
        .value(common::record(json!({ "entry": "boot" })))
        .run()
        .await;
    let message = outcome.runtime_error().expect("runtime error");
    assert!(message.contains("create"), "unexpected message: {message}");

    // Reads stay enabled and nothing was persisted.
    let total = orm.select_from("logs").count().await.expect_data("count");
    assert_eq!(total, 0);

    Ok(())
}

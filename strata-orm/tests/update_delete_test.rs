mod common;

use serde_json::json;
use strata_orm::{ApiFlags, Collection, Field, Op, Orm, QueryContext, Registry};

#[tokio::test]
async fn test_update_patches_only_given_fields() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    common::seed_products(&orm).await?;

    let updated = orm
        .update("products")
        .set(common::record(json!({ "price": 59.0 })))
        .where_("name", Op::Eq, "Chair")
        .run()
        .await
        .expect_data("update");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["price"], json!(59.0));
    // Untouched fields keep their values.
    assert_eq!(updated[0]["name"], json!("Chair"));
    assert_eq!(updated[0]["active"], json!(true));

    // Other rows are unaffected.
    let desk = orm
        .select_from("products")
        .where_("name", Op::Eq, "Desk")
        .first()
        .await
        .expect_data("desk")
        .expect("row");
    assert_eq!(desk["price"], json!(120.0));

    Ok(())
}

#[tokio::test]
async fn test_update_rejects_id_and_unknown_fields() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    common::seed_products(&orm).await?;

    let errors = orm
        .update("products")
        .set(common::record(json!({ "id": 99, "flavor": "sweet" })))
        .where_("name", Op::Eq, "Chair")
        .run()
        .await
        .input_errors()
        .expect("input errors");
    assert_eq!(errors["id"], "The id field cannot be updated");
    assert_eq!(errors["flavor"], "Unknown field");

    Ok(())
}

#[tokio::test]
async fn test_update_unique_excludes_the_pinned_row() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    common::seed_products(&orm).await?;

    // Writing a row's own name back is not a collision.
    let same = orm
        .update("products")
        .set(common::record(json!({ "name": "Chair" })))
        .where_("id", Op::Eq, 1)
        .run()
        .await;
    assert!(same.is_success(), "self-update failed: {same:?}");

    // Taking another row's name is.
    let errors = orm
        .update("products")
        .set(common::record(json!({ "name": "Desk" })))
        .where_("id", Op::Eq, 1)
        .run()
        .await
        .input_errors()
        .expect("collision");
    assert_eq!(errors["name"], "This value is already in use");

    Ok(())
}

#[tokio::test]
async fn test_validate_runs_no_sql() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    common::seed_products(&orm).await?;

    let before = orm.database().queries_executed();
    let outcome = orm
        .update("products")
        .set(common::record(json!({ "price": 1.0, "flavor": "sweet" })))
        .where_("id", Op::Eq, 1)
        .validate()
        .await;
    let errors = outcome.input_errors().expect("input errors");
    assert_eq!(errors["flavor"], "Unknown field");

    // The sync failure short-circuits before any probe, and no UPDATE ran.
    assert_eq!(orm.database().queries_executed(), before);
    let chair = orm
        .select_from("products")
        .where_("id", Op::Eq, 1)
        .first()
        .await
        .expect_data("chair")
        .expect("row");
    assert_eq!(chair["price"], json!(49.5));

    Ok(())
}

#[tokio::test]
async fn test_update_respects_language_scope() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    orm.insert_into("products")
        .values(vec![
            common::record(json!({ "name": "Chair", "language": "en", "price": 10.0 })),
            common::record(json!({ "name": "Stuhl", "language": "de", "price": 10.0 })),
        ])
        .run()
        .await
        .expect_data("seed");

    let updated = orm
        .update("products")
        .set(common::record(json!({ "price": 12.0 })))
        .with_context(QueryContext::new().with_language("de"))
        .run()
        .await
        .expect_data("scoped update");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["name"], json!("Stuhl"));

    let english = orm
        .select_from("products")
        .where_("name", Op::Eq, "Chair")
        .first()
        .await
        .expect_data("chair")
        .expect("row");
    assert_eq!(english["price"], json!(10.0));

    Ok(())
}

#[tokio::test]
async fn test_delete_returns_removed_rows() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    common::seed_products(&orm).await?;

    let removed = orm
        .delete_from("products")
        .where_("price", Op::Lt, 25.0)
        .run()
        .await
        .expect_data("delete");
    assert_eq!(removed.len(), 2); // Lamp, Stool
    assert!(removed.iter().all(|r| r["price"].as_f64().unwrap() < 25.0));

    let count = orm.select_from("products").count().await.expect_data("count");
    assert_eq!(count, 3);

    Ok(())
}

#[tokio::test]
async fn test_delete_selected_returning_columns() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    common::seed_products(&orm).await?;

    let removed = orm
        .delete_from("products")
        .where_("name", Op::Eq, "Desk")
        .returning(&["name"])
        .run()
        .await
        .expect_data("delete");
    assert_eq!(removed, vec![common::record(json!({ "name": "Desk" }))]);

    Ok(())
}

#[tokio::test]
async fn test_delete_without_conditions_clears_the_table(
) -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    common::seed_products(&orm).await?;

    let removed = orm.delete_from("products").run().await.expect_data("delete all");
    assert_eq!(removed.len(), 5);

    let count = orm.select_from("products").count().await.expect_data("count");
    assert_eq!(count, 0);

    Ok(())
}

#[tokio::test]
async fn test_update_and_delete_flags_are_enforced() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::connect().await?;
    db.raw("CREATE TABLE archive (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT)")
        .execute()
        .await?;
    let registry = Registry::builder()
        .collection(
            Collection::builder("archive")
                .field("label", Field::text())
                .api(ApiFlags { update: false, delete: false, ..ApiFlags::default() })
                .build(),
        )
        .build();
    let orm = Orm::new(db, registry);
    orm.insert_into("archive")
        .value(common::record(json!({ "label": "keep" })))
        .run()
        .await
        .expect_data("insert");

    let updated = orm
        .update("archive")
        .set(common::record(json!({ "label": "renamed" })))
        .run()
        .await;
    let message = updated.runtime_error().expect("runtime error");
    assert!(message.contains("update"), "unexpected message: {message}");

    let removed = orm.delete_from("archive").run().await;
    let message = removed.runtime_error().expect("runtime error");
    assert!(message.contains("delete"), "unexpected message: {message}");

    let total = orm.select_from("archive").count().await.expect_data("count");
    assert_eq!(total, 1);

    Ok(())
}

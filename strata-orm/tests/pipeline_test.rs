mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use strata_orm::{
    Collection, Field, Hook, Op, OperationScope, Orm, QueryContext, Registry, Sanitizer,
    Translator, Validator,
};

#[tokio::test]
async fn test_numeric_cast_sanitizer() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::connect().await?;
    db.raw("CREATE TABLE readings (id INTEGER PRIMARY KEY AUTOINCREMENT, celsius REAL)")
        .execute()
        .await?;
    let registry = Registry::builder()
        .collection(
            Collection::builder("readings")
                .field("celsius", Field::float().sanitizer(Sanitizer::numeric_cast()))
                .build(),
        )
        .build();
    let orm = Orm::new(db, registry);

    let inserted = orm
        .insert_into("readings")
        .value(common::record(json!({ "celsius": "21.5" })))
        .returning(&["*"])
        .run_one()
        .await
        .expect_data("insert")
        .expect("row");
    assert_eq!(inserted["celsius"], json!(21.5));

    Ok(())
}

#[tokio::test]
async fn test_custom_validator_scoped_to_create() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::connect().await?;
    db.raw("CREATE TABLE events (id INTEGER PRIMARY KEY AUTOINCREMENT, seats INTEGER)")
        .execute()
        .await?;
    let registry = Registry::builder()
        .collection(
            Collection::builder("events")
                .field(
                    "seats",
                    Field::integer().validator(Validator::custom(
                        OperationScope::Create,
                        |value, _ctx| match value.as_i64() {
                            Some(seats) if seats > 0 => Ok(()),
                            _ => Err("Seats must be a positive number".to_string()),
                        },
                    )),
                )
                .build(),
        )
        .build();
    let orm = Orm::new(db, registry);

    let errors = orm
        .insert_into("events")
        .value(common::record(json!({ "seats": 0 })))
        .run_one()
        .await
        .input_errors()
        .expect("input errors");
    assert_eq!(errors["seats"], "Seats must be a positive number");

    orm.insert_into("events")
        .value(common::record(json!({ "seats": 10 })))
        .run()
        .await
        .expect_data("valid insert");

    // The create-scoped validator does not run on update.
    let outcome = orm
        .update("events")
        .set(common::record(json!({ "seats": 0 })))
        .where_("id", Op::Eq, 1)
        .run()
        .await;
    assert!(outcome.is_success(), "update failed: {outcome:?}");

    Ok(())
}

#[tokio::test]
async fn test_unique_is_scoped_by_discriminators() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    orm.insert_into("products")
        .value(common::record(json!({ "name": "Chair", "language": "en" })))
        .run()
        .await
        .expect_data("first insert");

    // Same name, same language: rejected before any SQL write.
    let errors = orm
        .insert_into("products")
        .value(common::record(json!({ "name": "Chair", "language": "en" })))
        .run_one()
        .await
        .input_errors()
        .expect("collision");
    assert_eq!(errors["name"], "This value is already in use");

    // Same name in another language passes.
    orm.insert_into("products")
        .value(common::record(json!({ "name": "Chair", "language": "de" })))
        .run()
        .await
        .expect_data("translated insert");

    let count = orm.select_from("products").count().await.expect_data("count");
    assert_eq!(count, 2);

    Ok(())
}

#[tokio::test]
async fn test_repeater_errors_use_dot_paths() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let errors = orm
        .insert_into("posts")
        .value(common::record(json!({
            "title": "gallery post",
            "gallery": [
                { "caption": "ok", "position": 1 },
                { "position": 2 },
                { "caption": "fine", "extra": true },
            ],
        })))
        .run_one()
        .await
        .input_errors()
        .expect("input errors");

    assert_eq!(errors["gallery.1.caption"], "This field is required");
    assert_eq!(errors["gallery.2.extra"], "Unknown field");
    assert!(!errors.contains_key("gallery.0.caption"));

    // A non-array value is rejected at the repeater itself.
    let errors = orm
        .insert_into("posts")
        .value(common::record(json!({ "title": "bad", "gallery": "nope" })))
        .run_one()
        .await
        .input_errors()
        .expect("shape error");
    assert_eq!(errors["gallery"], "This field must be an array");

    Ok(())
}

#[tokio::test]
async fn test_repeater_round_trips_through_json_storage(
) -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let gallery = json!([{ "caption": "sunset", "position": 1 }]);
    let inserted = orm
        .insert_into("posts")
        .value(common::record(json!({ "title": "photos", "gallery": gallery })))
        .returning(&["*"])
        .run_one()
        .await
        .expect_data("insert")
        .expect("row");
    assert_eq!(inserted["gallery"], gallery);

    Ok(())
}

#[tokio::test]
async fn test_timestamp_and_time_validators() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let errors = orm
        .insert_into("posts")
        .value(common::record(json!({
            "title": "scheduled",
            "publishedAt": "soon",
            "dailyAt": 86_400_000,
        })))
        .run_one()
        .await
        .input_errors()
        .expect("input errors");
    assert_eq!(errors["publishedAt"], "This field must be a timestamp in milliseconds");
    assert_eq!(errors["dailyAt"], "This time of day is out of range");

    orm.insert_into("posts")
        .value(common::record(json!({
            "title": "scheduled",
            "publishedAt": 1_700_000_000_000_i64,
            "dailyAt": 43_200_000,
        })))
        .run()
        .await
        .expect_data("valid insert");

    Ok(())
}

#[tokio::test]
async fn test_validation_messages_pass_through_the_translator(
) -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;

    let translator: Translator = Arc::new(|message| match message {
        "This field is required" => "Dieses Feld ist erforderlich".to_string(),
        other => other.to_string(),
    });

    let errors = orm
        .insert_into("products")
        .value(common::record(json!({ "price": 5.0 })))
        .with_context(QueryContext::new().with_translator(translator))
        .run_one()
        .await
        .input_errors()
        .expect("input errors");
    assert_eq!(errors["name"], "Dieses Feld ist erforderlich");

    Ok(())
}

// ----------------------------------------------------------------------
// Lifecycle hooks
// ----------------------------------------------------------------------

fn notes_registry(create_hook: Hook, fetch_hook: Hook) -> Registry {
    Registry::builder()
        .collection(
            Collection::builder("notes")
                .field("body", Field::text())
                .hook(strata_orm::HookPhase::BeforeCreate, create_hook)
                .hook(strata_orm::HookPhase::AfterFetch, fetch_hook)
                .build(),
        )
        .build()
}

#[tokio::test]
async fn test_hooks_transform_rows_in_flight() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::connect().await?;
    db.raw("CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)")
        .execute()
        .await?;

    let uppercase: Hook = Arc::new(|mut rows, _ctx| {
        Box::pin(async move {
            for row in &mut rows {
                if let Some(Value::String(body)) = row.get("body").cloned() {
                    row.insert("body".to_string(), Value::String(body.to_uppercase()));
                }
            }
            Ok(rows)
        })
    });
    let tag: Hook = Arc::new(|mut rows, _ctx| {
        Box::pin(async move {
            for row in &mut rows {
                row.insert("fetched".to_string(), Value::Bool(true));
            }
            Ok(rows)
        })
    });
    let orm = Orm::new(db, notes_registry(uppercase, tag));

    orm.insert_into("notes")
        .value(common::record(json!({ "body": "quiet" })))
        .run()
        .await
        .expect_data("insert");

    let notes = orm.select_from("notes").all().await.expect_data("select");
    assert_eq!(notes[0]["body"], json!("QUIET"));
    // The fetch hook decorated the row on its way out.
    assert_eq!(notes[0]["fetched"], json!(true));

    Ok(())
}

#[tokio::test]
async fn test_failing_hook_aborts_with_its_phase() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::connect().await?;
    db.raw("CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)")
        .execute()
        .await?;

    let reject: Hook = Arc::new(|_rows, _ctx| {
        Box::pin(async move { Err("notes are read-only".to_string()) })
    });
    let pass: Hook = Arc::new(|rows, _ctx| Box::pin(async move { Ok(rows) }));
    let orm = Orm::new(db, notes_registry(reject, pass));

    let outcome = orm
        .insert_into("notes")
        .value(common::record(json!({ "body": "quiet" })))
        .run()
        .await;
    let message = outcome.runtime_error().expect("hook error");
    assert!(message.contains("beforeCreate"), "unexpected message: {message}");
    assert!(message.contains("notes are read-only"));

    // Bypassing hooks lets the insert through.
    let outcome = orm
        .insert_into("notes")
        .value(common::record(json!({ "body": "quiet" })))
        .with_context(QueryContext::new().bypassing_hooks())
        .run()
        .await;
    assert!(outcome.is_success(), "bypassed insert failed: {outcome:?}");

    Ok(())
}

#[tokio::test]
async fn test_prepare_hook_runs_before_every_read() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::connect().await?;
    db.raw("CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)")
        .execute()
        .await?;

    let prepares = Arc::new(AtomicUsize::new(0));
    let counter = prepares.clone();
    let hook: Hook = Arc::new(move |rows, _ctx| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(rows)
        })
    });
    let registry = Registry::builder()
        .collection(
            Collection::builder("notes")
                .field("body", Field::text())
                .hook(strata_orm::HookPhase::BeforeQueryPreparation, hook)
                .build(),
        )
        .build();
    let orm = Orm::new(db, registry);

    orm.select_from("notes").all().await.expect_data("all");
    assert_eq!(prepares.load(Ordering::SeqCst), 1);

    orm.select_from("notes").count().await.expect_data("count");
    assert_eq!(prepares.load(Ordering::SeqCst), 2);

    orm.select_from("notes").exists().await.expect_data("exists");
    assert_eq!(prepares.load(Ordering::SeqCst), 3);

    // Pagination prepares two statements, the count and the page.
    orm.select_from("notes")
        .paginate(Some(1), Some(10))
        .await
        .expect_data("page");
    assert_eq!(prepares.load(Ordering::SeqCst), 5);

    Ok(())
}

#![allow(dead_code)]

use serde_json::Value;
use strata_orm::{
    Collection, Database, Field, Orm, Record, Registry, Sanitizer, SortDirection, Validator,
};

/// In-memory SQLite with a single connection so every statement sees the
/// same database.
pub async fn connect() -> Result<Database, strata_orm::Error> {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::builder()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
}

pub fn registry() -> Registry {
    Registry::builder()
        .collection(
            Collection::builder("products")
                .translatable()
                .field(
                    "name",
                    Field::text()
                        .required()
                        .sanitizer(Sanitizer::trim())
                        .unique_per(&["language"]),
                )
                .field("price", Field::float())
                .field("active", Field::boolean().default_value(true))
                .searchable(&["name"])
                .default_order("price", SortDirection::Asc)
                .per_page(2, 5)
                .build(),
        )
        .collection(
            Collection::builder("users")
                .field("name", Field::text().required())
                .build(),
        )
        .collection(
            Collection::builder("posts")
                .field("title", Field::text().required().sanitizer(Sanitizer::trim()))
                .field("author", Field::record("users").populate_fields(&["id", "name"]))
                .field("editors", Field::records("users").populate_fields(&["id", "name"]))
                .field(
                    "gallery",
                    Field::repeater(vec![
                        ("caption", Field::text().required()),
                        ("position", Field::integer()),
                    ]),
                )
                .field("publishedAt", Field::integer().validator(Validator::timestamp()))
                .field("dailyAt", Field::integer().validator(Validator::time()))
                .build(),
        )
        .build()
}

/// Creates the tables behind the fixture collections and returns a ready
/// [`Orm`].
pub async fn setup() -> Result<Orm, Box<dyn std::error::Error>> {
    let db = connect().await?;
    db.raw(
        "CREATE TABLE products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            price REAL,
            active INTEGER,
            language TEXT,
            translation_id INTEGER
        )",
    )
    .execute()
    .await?;
    db.raw("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)")
        .execute()
        .await?;
    db.raw(
        "CREATE TABLE posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            author INTEGER,
            editors TEXT,
            gallery TEXT,
            published_at INTEGER,
            daily_at INTEGER
        )",
    )
    .execute()
    .await?;
    Ok(Orm::new(db, registry()))
}

/// Shorthand for building a [`Record`] from a `json!` object literal.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Seeds a handful of products in the default language.
pub async fn seed_products(orm: &Orm) -> Result<(), Box<dyn std::error::Error>> {
    let rows = vec![
        record(serde_json::json!({ "name": "Chair", "price": 49.5 })),
        record(serde_json::json!({ "name": "Desk", "price": 120.0 })),
        record(serde_json::json!({ "name": "Lamp", "price": 15.25, "active": false })),
        record(serde_json::json!({ "name": "Shelf", "price": 75.0 })),
        record(serde_json::json!({ "name": "Stool", "price": 22.0 })),
    ];
    let outcome = orm.insert_into("products").values(rows).run().await;
    assert!(outcome.is_success(), "seeding products failed: {outcome:?}");
    Ok(())
}

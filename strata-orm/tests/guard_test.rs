mod common;

use serde_json::json;
use strata_orm::{ApplyOptions, Guard, Op};

async fn seed_posts(orm: &strata_orm::Orm) -> Result<(), Box<dyn std::error::Error>> {
    orm.insert_into("users")
        .values(vec![
            common::record(json!({ "name": "alice" })),
            common::record(json!({ "name": "bob" })),
        ])
        .run()
        .await
        .expect_data("insert users");
    orm.insert_into("posts")
        .values(vec![
            common::record(json!({ "title": "alpha", "author": 1 })),
            common::record(json!({ "title": "beta", "author": 1 })),
            common::record(json!({ "title": "gamma", "author": 2 })),
        ])
        .run()
        .await
        .expect_data("insert posts");
    Ok(())
}

#[tokio::test]
async fn test_guarded_select_scopes_every_read() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    seed_posts(&orm).await?;

    let own = Guard::new().where_("author", Op::Eq, 1);

    let posts = orm
        .guarded_select_from("posts", &own)
        .all()
        .await
        .expect_data("guarded all");
    assert_eq!(posts.len(), 2);

    // Caller conditions AND with the guard; they can narrow, never widen.
    let posts = orm
        .guarded_select_from("posts", &own)
        .where_("title", Op::Eq, "gamma")
        .all()
        .await
        .expect_data("guarded narrow");
    assert!(posts.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_guard_survives_query_string_binding() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    seed_posts(&orm).await?;

    let own = Guard::new().where_("author", Op::Eq, 1);

    // A client filter for someone else's rows intersects to nothing.
    let posts = orm
        .guarded_select_from("posts", &own)
        .from_query_string("author=2", &ApplyOptions::default())
        .all()
        .await
        .expect_data("guarded query string");
    assert!(posts.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_guarded_update_and_delete() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    seed_posts(&orm).await?;

    let own = Guard::new().where_("author", Op::Eq, 1);

    // gamma belongs to author 2; the guarded update cannot touch it.
    let updated = orm
        .guarded_update("posts", &own)
        .set(common::record(json!({ "title": "renamed" })))
        .where_("title", Op::Eq, "gamma")
        .run()
        .await
        .expect_data("guarded update");
    assert!(updated.is_empty());

    let removed = orm
        .guarded_delete_from("posts", &own)
        .run()
        .await
        .expect_data("guarded delete");
    assert_eq!(removed.len(), 2);

    // Only the other author's post remains.
    let rest = orm.select_from("posts").all().await.expect_data("remaining");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0]["title"], json!("gamma"));

    Ok(())
}

#[tokio::test]
async fn test_composite_guards() -> Result<(), Box<dyn std::error::Error>> {
    let orm = common::setup().await?;
    seed_posts(&orm).await?;

    // WHERE (author = 1 OR author = 2) AND ...
    let either = Guard::new().or_group(|or| {
        or.branch(|g| g.where_("author", Op::Eq, 1))
            .branch(|g| g.where_("author", Op::Eq, 2))
    });
    let posts = orm
        .guarded_select_from("posts", &either)
        .all()
        .await
        .expect_data("composite guard");
    assert_eq!(posts.len(), 3);

    // An empty guard is a no-op.
    let open = Guard::new();
    assert!(open.is_empty());
    let posts = orm
        .guarded_select_from("posts", &open)
        .all()
        .await
        .expect_data("empty guard");
    assert_eq!(posts.len(), 3);

    Ok(())
}

//! Runs against a live PostgreSQL database named by `DATABASE_URL`.
//! Every test returns early when the variable is unset.

mod common;

use std::sync::Arc;

use elif_record::{
    attrs, json, with_transaction, ConfigError, DatabaseConfig, ModelDefinition, ModelError, PostgresBackend,
    Predicate, QueryOptions, TransactionScope, Value,
};

use common::init_tracing;

async fn connect() -> Option<PostgresBackend> {
    init_tracing();
    let config = match DatabaseConfig::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingRequired { .. }) => {
            eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
            return None;
        }
        Err(e) => panic!("invalid database configuration: {}", e),
    };
    Some(PostgresBackend::connect(&config).await.expect("connect to PostgreSQL"))
}

async fn recreate(backend: &PostgresBackend, table: &str, columns: &str) {
    sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table))
        .execute(backend.pool())
        .await
        .unwrap();
    sqlx::query(&format!("CREATE TABLE \"{}\" ({})", table, columns))
        .execute(backend.pool())
        .await
        .unwrap();
}

const TIMESTAMPED: &str = "id BIGSERIAL PRIMARY KEY, foo TEXT, \
     created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()";

#[tokio::test]
async fn create_update_and_destroy_on_timestamped_table() {
    let Some(backend) = connect().await else { return };
    recreate(&backend, "pg_lifecycle_posts", TIMESTAMPED).await;
    let posts = ModelDefinition::new("Post")
        .with_table_name("pg_lifecycle_posts")
        .with_default_backend(backend.handle())
        .shared();

    let mut post = posts.create(attrs! { "foo" => "bar" }, QueryOptions::new()).await.unwrap();
    let id = post.id().cloned().expect("generated id");
    assert!(post.get("createdAt").is_some_and(Value::is_string));

    post.set("foo", "baz");
    post.save(QueryOptions::new().method("update")).await.unwrap();

    let found = posts.find(id.clone(), QueryOptions::new()).await.unwrap().unwrap();
    assert_eq!(found.get("foo"), Some(&json!("baz")));
    assert_eq!(found.get("created_at"), post.get("created_at"));

    post.destroy(None, QueryOptions::new()).await.unwrap();
    assert!(posts.find(id, QueryOptions::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn null_is_written_into_typed_columns() {
    let Some(backend) = connect().await else { return };
    recreate(&backend, "pg_nullable_nums", "id SERIAL PRIMARY KEY, n INT, seen_at TIMESTAMPTZ").await;
    let nums = ModelDefinition::new("Num")
        .with_table_name("pg_nullable_nums")
        .with_default_backend(backend.handle())
        .shared();

    let mut num = nums
        .create(attrs! { "n" => Value::Null, "seenAt" => Value::Null }, QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(num.get("n"), Some(&Value::Null));

    num.set("n", 5);
    num.save(QueryOptions::new().method("update")).await.unwrap();

    let found = nums
        .find_one(Predicate::new().eq("n", 5), QueryOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("seen_at"), Some(&Value::Null));
}

#[tokio::test]
async fn uuid_keys_round_trip() {
    let Some(backend) = connect().await else { return };
    recreate(&backend, "pg_uuid_tags", "id UUID PRIMARY KEY, label TEXT").await;
    let tags = ModelDefinition::new("Tag")
        .with_table_name("pg_uuid_tags")
        .with_default_backend(backend.handle())
        .shared();

    let id = "7f1c4c1e-3c55-4c43-a1b8-7b7dc0b06a5e";
    tags.create(attrs! { "id" => id, "label" => "a" }, QueryOptions::new()).await.unwrap();

    let mut tag = tags.find(id, QueryOptions::new()).await.unwrap().unwrap();
    assert_eq!(tag.get("id"), Some(&json!(id)));

    tag.set("label", "b");
    tag.save(QueryOptions::new().method("update")).await.unwrap();
    let removed = tags
        .destroy_where(Some(Predicate::new().eq("label", "b")), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn find_one_and_bulk_operations() {
    let Some(backend) = connect().await else { return };
    recreate(&backend, "pg_bulk_posts", TIMESTAMPED).await;
    let posts = ModelDefinition::new("Post")
        .with_table_name("pg_bulk_posts")
        .with_default_backend(backend.handle())
        .shared();

    for foo in ["bar", "bar", "qux"] {
        posts.create(attrs! { "foo" => foo }, QueryOptions::new()).await.unwrap();
    }

    assert!(posts.find_one(Predicate::new(), QueryOptions::new()).await.unwrap().is_some());

    let updated = posts
        .update_where(attrs! { "foo" => "baz" }, Some(Predicate::new().eq("foo", "bar")), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(updated.len(), 2);

    assert_eq!(posts.destroy_where(None, QueryOptions::new()).await.unwrap(), 3);
    assert!(posts.all(None, QueryOptions::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn transaction_rollback_and_commit() {
    let Some(backend) = connect().await else { return };
    recreate(&backend, "pg_tx_posts", TIMESTAMPED).await;
    let posts = ModelDefinition::new("Post")
        .with_table_name("pg_tx_posts")
        .with_default_backend(backend.handle())
        .shared();

    let scope = backend.begin_transaction().await.unwrap();
    let mut post = posts.build(attrs! { "foo" => "discarded" });
    post.bind_transaction(Arc::clone(&scope).as_backend());
    post.save(QueryOptions::new()).await.unwrap();
    post.set("foo", "still discarded");
    post.save(QueryOptions::new().method("update")).await.unwrap();
    scope.rollback().await.unwrap();
    assert!(posts.all(None, QueryOptions::new()).await.unwrap().is_empty());

    let result = with_transaction(&backend, |tx| {
        let posts = Arc::clone(&posts);
        async move {
            posts
                .create(attrs! { "foo" => "kept" }, QueryOptions::new().transaction(tx))
                .await?;
            Ok::<(), ModelError>(())
        }
    })
    .await;
    result.unwrap();

    let kept = posts.all(None, QueryOptions::new()).await.unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].get("foo"), Some(&json!("kept")));
}

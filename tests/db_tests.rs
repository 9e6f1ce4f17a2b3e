//! Pool and migration tests against a file-backed SQLite database.

use catalog_sync::{config::AppConfig, db};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use tempfile::TempDir;

async fn file_db(dir: &TempDir) -> anyhow::Result<DatabaseConnection> {
    let path = dir.path().join("catalog.db");
    let config = AppConfig {
        database_url: format!("sqlite://{}?mode=rwc", path.display()),
        db_max_connections: 2,
        db_acquire_timeout_ms: 2000,
        ..AppConfig::default()
    };
    db::init_pool(&config).await
}

async fn table_exists(db: &DatabaseConnection, table: &str) -> anyhow::Result<bool> {
    let stmt = Statement::from_string(
        db.get_database_backend(),
        format!("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{table}'"),
    );
    Ok(db.query_one(stmt).await?.is_some())
}

#[tokio::test]
async fn migrations_create_every_table() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = file_db(&dir).await?;

    db::migrate(&db).await?;
    db::health_check(&db).await?;

    let applied = Migrator::get_applied_migrations(&db).await?;
    assert_eq!(applied.len(), 4);
    for table in ["jobs", "pages", "products", "product_variations", "options"] {
        assert!(table_exists(&db, table).await?, "missing table {table}");
    }

    // Running again is a no-op.
    db::migrate(&db).await?;
    assert_eq!(Migrator::get_applied_migrations(&db).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn migrations_roll_back_cleanly() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = file_db(&dir).await?;

    Migrator::up(&db, None).await?;
    Migrator::down(&db, None).await?;

    assert!(Migrator::get_applied_migrations(&db).await?.is_empty());
    for table in ["jobs", "pages", "products", "product_variations", "options"] {
        assert!(!table_exists(&db, table).await?, "table {table} survived rollback");
    }
    Ok(())
}

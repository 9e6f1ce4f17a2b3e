//! Database migrations for the catalog sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_090000_create_jobs;
mod m2026_01_10_090100_create_pages;
mod m2026_01_10_090200_create_products;
mod m2026_01_10_090300_create_options;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_090000_create_jobs::Migration),
            Box::new(m2026_01_10_090100_create_pages::Migration),
            Box::new(m2026_01_10_090200_create_products::Migration),
            Box::new(m2026_01_10_090300_create_options::Migration),
        ]
    }
}

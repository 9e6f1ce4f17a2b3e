//! Migration to create the options key-value table.
//!
//! Backs advisory locks, the failure quarantine, stuck-process markers and
//! operator notices. Rows with an `expires_at` in the past are treated as
//! absent by readers.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Options::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Options::Key).text().not_null().primary_key())
                    .col(ColumnDef::new(Options::Value).json_binary().not_null())
                    .col(
                        ColumnDef::new(Options::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Options::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Options::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Options {
    Table,
    Key,
    Value,
    ExpiresAt,
    UpdatedAt,
}

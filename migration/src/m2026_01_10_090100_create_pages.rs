//! Migration to create the pages staging table.
//!
//! Each row holds one serialized remote page for an import key, plus the
//! processed flag flipped by the processing phase.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Pages::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Pages::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Pages::Key).text().not_null())
                    .col(ColumnDef::new(Pages::Response).json_binary().not_null())
                    .col(
                        ColumnDef::new(Pages::Processed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Pages::Page).integer().not_null())
                    .col(
                        ColumnDef::new(Pages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pages_key_page")
                    .table(Pages::Table)
                    .col(Pages::Key)
                    .col(Pages::Page)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pages_key_processed_page")
                    .table(Pages::Table)
                    .col(Pages::Key)
                    .col(Pages::Processed)
                    .col(Pages::Page)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_pages_key_page").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_pages_key_processed_page").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Pages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Pages {
    Table,
    Id,
    Key,
    Response,
    Processed,
    Page,
    CreatedAt,
}

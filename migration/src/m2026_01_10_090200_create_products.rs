//! Migration to create the local catalog tables.
//!
//! `products` holds simple products and variable-product parents keyed by the
//! supplier SKU; `product_variations` holds one row per supplier variant.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Products::Sku).text().null())
                    .col(ColumnDef::new(Products::BackupSku).text().null())
                    .col(
                        ColumnDef::new(Products::Kind)
                            .text()
                            .not_null()
                            .default("simple"),
                    )
                    .col(ColumnDef::new(Products::Name).text().not_null())
                    .col(ColumnDef::new(Products::Description).text().null())
                    .col(ColumnDef::new(Products::RegularPrice).big_integer().null())
                    .col(ColumnDef::new(Products::SalePrice).big_integer().null())
                    .col(ColumnDef::new(Products::Price).big_integer().null())
                    .col(
                        ColumnDef::new(Products::StockQuantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Products::StockStatus)
                            .text()
                            .not_null()
                            .default("outofstock"),
                    )
                    .col(ColumnDef::new(Products::Categories).json_binary().null())
                    .col(ColumnDef::new(Products::CategoryPath).json_binary().null())
                    .col(ColumnDef::new(Products::ImageUrl).text().null())
                    .col(ColumnDef::new(Products::Gallery).json_binary().null())
                    .col(ColumnDef::new(Products::Attributes).json_binary().null())
                    .col(ColumnDef::new(Products::Shipments).json_binary().null())
                    .col(
                        ColumnDef::new(Products::ShipmentsReference)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(Products::PriceSnapshot).json_binary().null())
                    .col(ColumnDef::new(Products::ThumbnailPath).text().null())
                    .col(
                        ColumnDef::new(Products::Deprecated)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Products::DeprecatedReason).text().null())
                    .col(ColumnDef::new(Products::DeprecatedBy).text().null())
                    .col(
                        ColumnDef::new(Products::DeprecatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Products::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Products::SyncAttemptedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Products::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Products::UpdatedAt)
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
                    .name("idx_products_sku")
                    .table(Products::Table)
                    .col(Products::Sku)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_products_backup_sku")
                    .table(Products::Table)
                    .col(Products::BackupSku)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_products_sync_attempted_at")
                    .table(Products::Table)
                    .col(Products::SyncAttemptedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProductVariations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductVariations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductVariations::ProductId).uuid().not_null())
                    .col(ColumnDef::new(ProductVariations::VariantKey).text().not_null())
                    .col(
                        ColumnDef::new(ProductVariations::Attributes)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductVariations::RegularPrice)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductVariations::SalePrice)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(ProductVariations::Price).big_integer().null())
                    .col(
                        ColumnDef::new(ProductVariations::PriceForResell)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductVariations::StockQuantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ProductVariations::StockStatus)
                            .text()
                            .not_null()
                            .default("outofstock"),
                    )
                    .col(
                        ColumnDef::new(ProductVariations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProductVariations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_product_variations_product_id")
                            .from(ProductVariations::Table, ProductVariations::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_product_variations_product_variant")
                    .table(ProductVariations::Table)
                    .col(ProductVariations::ProductId)
                    .col(ProductVariations::VariantKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProductVariations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    Sku,
    BackupSku,
    Kind,
    Name,
    Description,
    RegularPrice,
    SalePrice,
    Price,
    StockQuantity,
    StockStatus,
    Categories,
    CategoryPath,
    ImageUrl,
    Gallery,
    Attributes,
    Shipments,
    ShipmentsReference,
    PriceSnapshot,
    ThumbnailPath,
    Deprecated,
    DeprecatedReason,
    DeprecatedBy,
    DeprecatedAt,
    LastSyncedAt,
    SyncAttemptedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ProductVariations {
    Table,
    Id,
    ProductId,
    VariantKey,
    Attributes,
    RegularPrice,
    SalePrice,
    Price,
    PriceForResell,
    StockQuantity,
    StockStatus,
    CreatedAt,
    UpdatedAt,
}

//! Product entity model
//!
//! Local catalog entry for a simple product or the parent of a variable
//! product. The supplier SKU is the stable external key; a deprecated product
//! keeps its former SKU in `backup_sku` so it can be restored later.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::product_variation::Entity as ProductVariation;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// External SKU key (exact-match lookups only)
    pub sku: Option<String>,

    /// SKU held by a deprecated product until it is restored
    pub backup_sku: Option<String>,

    /// `simple` or `variable`
    pub kind: String,

    pub name: String,
    pub description: Option<String>,
    pub regular_price: Option<i64>,
    pub sale_price: Option<i64>,
    pub price: Option<i64>,
    pub stock_quantity: i32,

    /// `instock` or `outofstock`
    pub stock_status: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub categories: Option<JsonValue>,
    #[sea_orm(column_type = "JsonBinary")]
    pub category_path: Option<JsonValue>,
    pub image_url: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub gallery: Option<JsonValue>,
    #[sea_orm(column_type = "JsonBinary")]
    pub attributes: Option<JsonValue>,

    /// Snapshot of the supplier shipment options
    #[sea_orm(column_type = "JsonBinary")]
    pub shipments: Option<JsonValue>,
    #[sea_orm(column_type = "JsonBinary")]
    pub shipments_reference: Option<JsonValue>,

    /// Snapshot of the resolved price scenario
    #[sea_orm(column_type = "JsonBinary")]
    pub price_snapshot: Option<JsonValue>,

    pub thumbnail_path: Option<String>,

    pub deprecated: bool,
    pub deprecated_reason: Option<String>,
    pub deprecated_by: Option<String>,
    pub deprecated_at: Option<DateTimeWithTimeZone>,

    /// Last successful upsert from supplier data
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Last re-sync attempt, successful or not
    pub sync_attempted_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "ProductVariation")]
    Variations,
}

impl Related<ProductVariation> for Entity {
    fn to() -> RelationDef {
        Relation::Variations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub const KIND_SIMPLE: &str = "simple";
pub const KIND_VARIABLE: &str = "variable";
pub const STOCK_IN: &str = "instock";
pub const STOCK_OUT: &str = "outofstock";

/// Stock status string for a quantity.
pub fn stock_status_for(quantity: i32) -> &'static str {
    if quantity > 0 { STOCK_IN } else { STOCK_OUT }
}

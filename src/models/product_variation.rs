//! Product variation entity model
//!
//! One row per supplier variant of a variable product, keyed by the
//! supplier's variant id within its parent.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::product::Entity as Product;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "product_variations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub product_id: Uuid,

    /// External variant key (supplier `_id`)
    pub variant_key: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub attributes: Option<JsonValue>,

    pub regular_price: Option<i64>,
    pub sale_price: Option<i64>,
    pub price: Option<i64>,
    pub price_for_resell: Option<i64>,
    pub stock_quantity: i32,
    pub stock_status: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Product",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<Product> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! Page entity model
//!
//! Staging rows holding one serialized remote page each. The fetch phase of
//! an import writes them; the processing phase consumes them in ascending
//! page order and flips `processed` exactly once.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Logical bucket, e.g. `products`
    pub key: String,

    /// Raw page payload as returned by the supplier (`total` + `items`)
    #[sea_orm(column_type = "JsonBinary")]
    pub response: JsonValue,

    pub processed: bool,

    /// 1-based page number within the run
    pub page: i32,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Items array of the staged payload; missing or malformed yields empty.
    pub fn items(&self) -> Vec<JsonValue> {
        self.response
            .get("items")
            .and_then(|items| items.as_array())
            .cloned()
            .unwrap_or_default()
    }
}

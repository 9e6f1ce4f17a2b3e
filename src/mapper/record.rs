//! Typed view of a supplier product record.
//!
//! Payloads are loosely typed on the wire; [`decode`] validates them into
//! [`RemoteProductRecord`] and reports anything unusable as a
//! [`MappingError`].

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use super::MappingError;

/// A decoded supplier product, discriminated by topology.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteProductRecord {
    Simple {
        common: CommonFields,
        variant: RemoteVariant,
    },
    Variable {
        common: CommonFields,
        variants: Vec<RemoteVariant>,
        attributes: Vec<RemoteAttribute>,
    },
}

impl RemoteProductRecord {
    pub fn common(&self) -> &CommonFields {
        match self {
            RemoteProductRecord::Simple { common, .. }
            | RemoteProductRecord::Variable { common, .. } => common,
        }
    }

    pub fn sku(&self) -> &str {
        &self.common().sku
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, RemoteProductRecord::Variable { .. })
    }
}

/// Fields shared by both topologies.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonFields {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub main_image: Option<String>,
    pub images: Vec<String>,
    pub categories: Vec<RemoteCategory>,
    pub shipments: Vec<JsonValue>,
    pub shipments_reference: ShipmentsReference,
    pub resell_status: Option<String>,
    /// Variants that were present but ignored for a simple product
    pub ignored_variants: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShipmentsReference {
    pub id: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteCategory {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteAttribute {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteVariant {
    pub id: String,
    pub price: Option<i64>,
    pub label_price: Option<i64>,
    pub stock: Option<i64>,
    pub price_for_resell: Option<i64>,
    /// Attribute key to selected value
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProduct {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    main_image: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    categories: Vec<RemoteCategory>,
    #[serde(default)]
    attributes: Vec<RemoteAttribute>,
    #[serde(default)]
    variants: Option<Vec<RawVariant>>,
    #[serde(default)]
    shipments: Option<Vec<JsonValue>>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    shipments_reference_id: Option<String>,
    #[serde(default)]
    shipments_reference_city: Option<String>,
    #[serde(default)]
    shipments_reference_state: Option<String>,
    #[serde(default)]
    resell_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariant {
    #[serde(rename = "_id", default, deserialize_with = "optional_string_or_number")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    price: Option<i64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    label_price: Option<i64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    stock: Option<i64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    price_for_resell: Option<i64>,
    #[serde(default)]
    attributes: BTreeMap<String, JsonValue>,
}

/// Validate a raw supplier payload.
pub fn decode(value: &JsonValue) -> Result<RemoteProductRecord, MappingError> {
    if !value.is_object() {
        return Err(MappingError::NotAnObject);
    }

    let raw = RawProduct::deserialize(value).map_err(|e| MappingError::Schema(e.to_string()))?;

    let sku = non_empty(raw.id).ok_or(MappingError::MissingField("id"))?;
    let name = non_empty(raw.title).ok_or(MappingError::MissingField("title"))?;

    let raw_variants = raw
        .variants
        .filter(|variants| !variants.is_empty())
        .ok_or_else(|| MappingError::NoVariants { sku: sku.clone() })?;

    let mut variants = Vec::with_capacity(raw_variants.len());
    for (index, raw_variant) in raw_variants.into_iter().enumerate() {
        let id = non_empty(raw_variant.id).ok_or_else(|| MappingError::InvalidField {
            field: format!("variants[{index}]._id"),
            reason: "missing".to_string(),
        })?;

        let attributes = raw_variant
            .attributes
            .into_iter()
            .filter_map(|(key, value)| attribute_value(&value).map(|value| (key, value)))
            .collect();

        variants.push(RemoteVariant {
            id,
            price: raw_variant.price,
            label_price: raw_variant.label_price,
            stock: raw_variant.stock,
            price_for_resell: raw_variant.price_for_resell,
            attributes,
        });
    }

    let mut seen = std::collections::BTreeSet::new();
    for variant in &variants {
        if !seen.insert(variant.id.as_str()) {
            return Err(MappingError::InvalidField {
                field: "variants._id".to_string(),
                reason: format!("duplicate variant id {}", variant.id),
            });
        }
    }

    let mut common = CommonFields {
        sku,
        name,
        description: raw.description.filter(|d| !d.trim().is_empty()),
        main_image: non_empty(raw.main_image),
        images: raw.images,
        categories: raw.categories,
        shipments: raw.shipments.unwrap_or_default(),
        shipments_reference: ShipmentsReference {
            id: non_empty(raw.shipments_reference_id),
            city: non_empty(raw.shipments_reference_city),
            state: non_empty(raw.shipments_reference_state),
        },
        resell_status: non_empty(raw.resell_status),
        ignored_variants: 0,
    };

    if raw.attributes.is_empty() {
        common.ignored_variants = variants.len() - 1;
        let variant = variants.swap_remove(0);
        Ok(RemoteProductRecord::Simple { common, variant })
    } else {
        Ok(RemoteProductRecord::Variable {
            common,
            variants,
            attributes: raw.attributes,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn attribute_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    optional_string_or_number(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("expected a string or number"))
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

/// Amounts arrive as integers, floats or numeric strings; blanks mean absent.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("amount out of range: {n}"))),
        Some(JsonValue::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f.round() as i64))
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("not a number: {trimmed}")))
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected an amount, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_without_attributes_is_simple() {
        let record = decode(&json!({
            "id": "SKU-1",
            "title": "Mug",
            "variants": [{"_id": "v1", "price": "1200", "stock": 4}]
        }))
        .expect("decodes");

        match record {
            RemoteProductRecord::Simple { common, variant } => {
                assert_eq!(common.sku, "SKU-1");
                assert_eq!(variant.price, Some(1200));
                assert_eq!(variant.stock, Some(4));
            }
            other => panic!("expected simple, got {other:?}"),
        }
    }

    #[test]
    fn record_with_attributes_is_variable() {
        let record = decode(&json!({
            "id": 42,
            "title": "Shirt",
            "attributes": [{"key": "size", "name": "Size", "values": ["S", "M"]}],
            "variants": [
                {"_id": "a", "price": 10.4, "attributes": {"size": "S"}},
                {"_id": "b", "price": 12, "attributes": {"size": "M"}}
            ]
        }))
        .expect("decodes");

        assert!(record.is_variable());
        assert_eq!(record.sku(), "42");
        if let RemoteProductRecord::Variable { variants, .. } = record {
            assert_eq!(variants[0].price, Some(10));
            assert_eq!(variants[1].attributes.get("size").map(String::as_str), Some("M"));
        }
    }

    #[test]
    fn missing_required_fields_are_mapping_errors() {
        assert_eq!(decode(&json!([1, 2])), Err(MappingError::NotAnObject));
        assert_eq!(
            decode(&json!({"title": "x", "variants": [{"_id": "a"}]})),
            Err(MappingError::MissingField("id"))
        );
        assert_eq!(
            decode(&json!({"id": "S", "title": "x", "variants": []})),
            Err(MappingError::NoVariants {
                sku: "S".to_string()
            })
        );
        assert!(matches!(
            decode(&json!({"id": "S", "title": "x", "variants": [{"price": 1}]})),
            Err(MappingError::InvalidField { .. })
        ));
        assert!(matches!(
            decode(&json!({"id": "S", "title": "x", "variants": [{"_id": "a", "price": "abc"}]})),
            Err(MappingError::Schema(_))
        ));
    }
}

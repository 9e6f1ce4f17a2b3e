//! # Product Mapper
//!
//! Pure transformation from a decoded supplier record into the shape the
//! upsert engine writes. No I/O; the same input always yields the same
//! output.

pub mod price;
pub mod record;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use url::Url;

pub use price::{PriceResolution, StockOverride, resolve_price, resolve_stock};
pub use record::{
    CommonFields, RemoteAttribute, RemoteCategory, RemoteProductRecord, RemoteVariant,
    ShipmentsReference, decode,
};

use crate::models::product::{KIND_SIMPLE, KIND_VARIABLE};

/// Malformed or incomplete supplier record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("product {sku} has no variants")]
    NoVariants { sku: String },
    #[error("malformed record: {0}")]
    Schema(String),
}

/// Unit the local store keeps prices in. Supplier amounts are in rial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Currency {
    #[default]
    Rial,
    Toman,
}

impl Currency {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rial" | "irr" => Some(Currency::Rial),
            "toman" | "irt" => Some(Currency::Toman),
            _ => None,
        }
    }

    fn from_rial(&self, amount: i64) -> i64 {
        match self {
            Currency::Rial => amount,
            Currency::Toman => amount / 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapperOptions {
    pub currency: Currency,
}

/// Non-fatal oddities found while mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingWarning {
    MissingPrice { variant_key: String },
    StockForcedZero { reason: StockOverride },
    InvalidImage { url: String },
    IgnoredVariants { count: usize },
    UnknownVariantAttribute { variant_key: String, key: String },
}

/// Local product shape produced for the upsert engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedProduct {
    pub sku: String,
    pub kind: &'static str,
    pub name: String,
    pub description: Option<String>,
    /// Product-level price; for variable products the cheapest sellable variant
    pub price: PriceResolution,
    /// Product-level stock; for variable products the sum over variants
    pub stock_quantity: i64,
    pub categories: Vec<String>,
    pub category_path: Vec<String>,
    pub image_url: Option<String>,
    pub gallery: Vec<String>,
    /// Attribute name to offered values
    pub attributes: BTreeMap<String, Vec<String>>,
    pub variants: Vec<MappedVariant>,
    pub shipments: Vec<JsonValue>,
    pub shipments_reference: Option<MappedShipmentsReference>,
    #[serde(skip)]
    pub warnings: Vec<MappingWarning>,
}

impl MappedProduct {
    pub fn is_variable(&self) -> bool {
        self.kind == KIND_VARIABLE
    }

    /// Prices as persisted for later comparison.
    pub fn price_snapshot(&self) -> JsonValue {
        let variants: BTreeMap<&str, &PriceResolution> = self
            .variants
            .iter()
            .map(|variant| (variant.variant_key.as_str(), &variant.price))
            .collect();
        serde_json::json!({
            "product": self.price,
            "variants": variants,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedVariant {
    pub variant_key: String,
    /// Attribute name to selected value
    pub attributes: BTreeMap<String, String>,
    pub price: PriceResolution,
    pub price_for_resell: Option<i64>,
    pub stock_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedShipmentsReference {
    pub id: String,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// Decode and map a raw supplier payload in one step.
pub fn map_value(value: &JsonValue, options: &MapperOptions) -> Result<MappedProduct, MappingError> {
    let record = decode(value)?;
    Ok(serialize(&record, options))
}

/// Map a decoded record into the local product shape.
pub fn serialize(record: &RemoteProductRecord, options: &MapperOptions) -> MappedProduct {
    let common = record.common();
    let mut warnings = Vec::new();

    let stock_rule = resolve_stock(
        Some(0),
        common.resell_status.as_deref(),
        common.shipments_reference.id.as_deref(),
        !common.shipments.is_empty(),
    );
    if let Some(reason) = stock_rule.forced_zero {
        warnings.push(MappingWarning::StockForcedZero { reason });
    }

    let (kind, variants, attributes) = match record {
        RemoteProductRecord::Simple { variant, .. } => {
            if common.ignored_variants > 0 {
                warnings.push(MappingWarning::IgnoredVariants {
                    count: common.ignored_variants,
                });
            }
            let mapped = map_variant(variant, common, &HashMap::new(), options, &mut warnings);
            (KIND_SIMPLE, vec![mapped], BTreeMap::new())
        }
        RemoteProductRecord::Variable {
            variants,
            attributes,
            ..
        } => {
            let names: HashMap<&str, &str> = attributes
                .iter()
                .map(|attribute| (attribute.key.as_str(), attribute.name.as_str()))
                .collect();
            let mapped = variants
                .iter()
                .map(|variant| map_variant(variant, common, &names, options, &mut warnings))
                .collect();
            (KIND_VARIABLE, mapped, attribute_map(attributes))
        }
    };

    let (price, stock_quantity) = if kind == KIND_SIMPLE {
        variants
            .first()
            .map(|variant| (variant.price, variant.stock_quantity))
            .unwrap_or_default()
    } else {
        parent_price_and_stock(&variants)
    };

    let image_url = common
        .main_image
        .as_deref()
        .and_then(|url| validated_image(url, &mut warnings));
    let gallery = gallery(&common.images, image_url.as_deref(), &mut warnings);

    MappedProduct {
        sku: common.sku.clone(),
        kind,
        name: common.name.clone(),
        description: common.description.clone(),
        price,
        stock_quantity,
        categories: common
            .categories
            .iter()
            .map(|category| category.name.clone())
            .collect(),
        category_path: category_path(&common.categories),
        image_url,
        gallery,
        attributes,
        variants,
        shipments: common.shipments.clone(),
        shipments_reference: common.shipments_reference.id.as_ref().map(|id| {
            MappedShipmentsReference {
                id: id.clone(),
                city: common.shipments_reference.city.clone(),
                state: common.shipments_reference.state.clone(),
            }
        }),
        warnings,
    }
}

fn map_variant(
    variant: &RemoteVariant,
    common: &CommonFields,
    attribute_names: &HashMap<&str, &str>,
    options: &MapperOptions,
    warnings: &mut Vec<MappingWarning>,
) -> MappedVariant {
    let price = resolve_price(variant.label_price, variant.price)
        .convert(|amount| options.currency.from_rial(amount));
    if price.is_empty() {
        warnings.push(MappingWarning::MissingPrice {
            variant_key: variant.id.clone(),
        });
    }

    let stock = resolve_stock(
        variant.stock,
        common.resell_status.as_deref(),
        common.shipments_reference.id.as_deref(),
        !common.shipments.is_empty(),
    );

    let mut attributes = BTreeMap::new();
    for (key, value) in &variant.attributes {
        match attribute_names.get(key.as_str()) {
            Some(name) => {
                attributes.insert((*name).to_string(), value.clone());
            }
            None if attribute_names.is_empty() => {}
            None => warnings.push(MappingWarning::UnknownVariantAttribute {
                variant_key: variant.id.clone(),
                key: key.clone(),
            }),
        }
    }

    MappedVariant {
        variant_key: variant.id.clone(),
        attributes,
        price,
        price_for_resell: variant
            .price_for_resell
            .map(|amount| options.currency.from_rial(amount)),
        stock_quantity: stock.quantity,
    }
}

/// Stock is summed; price follows the cheapest in-stock variant, falling
/// back to the cheapest priced variant when nothing is sellable.
fn parent_price_and_stock(variants: &[MappedVariant]) -> (PriceResolution, i64) {
    let stock = variants.iter().map(|variant| variant.stock_quantity).sum();

    let cheapest = |in_stock_only: bool| {
        variants
            .iter()
            .filter(|variant| !in_stock_only || variant.stock_quantity > 0)
            .filter(|variant| variant.price.active.is_some())
            .min_by_key(|variant| variant.price.active)
            .map(|variant| variant.price)
    };

    let price = cheapest(true).or_else(|| cheapest(false)).unwrap_or_default();
    (price, stock)
}

fn attribute_map(attributes: &[RemoteAttribute]) -> BTreeMap<String, Vec<String>> {
    attributes
        .iter()
        .map(|attribute| {
            let mut values = Vec::new();
            for value in &attribute.values {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
            (attribute.name.clone(), values)
        })
        .collect()
}

fn validated_image(url: &str, warnings: &mut Vec<MappingWarning>) -> Option<String> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(parsed.to_string()),
        _ => {
            warnings.push(MappingWarning::InvalidImage {
                url: url.to_string(),
            });
            None
        }
    }
}

fn gallery(
    images: &[String],
    main_image: Option<&str>,
    warnings: &mut Vec<MappingWarning>,
) -> Vec<String> {
    let mut seen: BTreeSet<String> = main_image.map(str::to_string).into_iter().collect();
    let mut gallery = Vec::new();

    for image in images {
        if let Some(url) = validated_image(image.trim(), warnings)
            && seen.insert(url.clone())
        {
            gallery.push(url);
        }
    }

    gallery
}

/// Root-to-leaf names of the deepest category, following parent links.
fn category_path(categories: &[RemoteCategory]) -> Vec<String> {
    let by_id: HashMap<&str, &RemoteCategory> = categories
        .iter()
        .map(|category| (category.id.as_str(), category))
        .collect();
    let parents: BTreeSet<&str> = categories
        .iter()
        .filter_map(|category| category.parent.as_deref())
        .collect();

    let Some(leaf) = categories
        .iter()
        .find(|category| !parents.contains(category.id.as_str()))
        .or_else(|| categories.first())
    else {
        return Vec::new();
    };

    let mut path = Vec::new();
    let mut visited = BTreeSet::new();
    let mut current = Some(leaf);

    while let Some(category) = current {
        if !visited.insert(category.id.as_str()) {
            break;
        }
        path.push(category.name.clone());
        current = category
            .parent
            .as_deref()
            .and_then(|parent| by_id.get(parent).copied());
    }

    path.reverse();
    path
}

//! Price scenario and stock resolution rules.

use serde::{Deserialize, Serialize};

/// Regular, sale and active price of one variant. `None` means "empty".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceResolution {
    pub regular: Option<i64>,
    pub sale: Option<i64>,
    pub active: Option<i64>,
}

impl PriceResolution {
    pub fn is_empty(&self) -> bool {
        self.regular.is_none() && self.sale.is_none() && self.active.is_none()
    }

    /// Apply a unit conversion to every present amount.
    pub fn convert(self, f: impl Fn(i64) -> i64) -> Self {
        Self {
            regular: self.regular.map(&f),
            sale: self.sale.map(&f),
            active: self.active.map(&f),
        }
    }
}

/// Resolve the price scenario of a variant.
///
/// A markdown exists only when the label price is positive and strictly
/// above the selling price.
pub fn resolve_price(label_price: Option<i64>, price: Option<i64>) -> PriceResolution {
    match (label_price, price) {
        (Some(label), Some(price)) if label > 0 && label > price => PriceResolution {
            regular: Some(label),
            sale: Some(price),
            active: Some(price),
        },
        (_, Some(price)) => PriceResolution {
            regular: Some(price),
            sale: None,
            active: Some(price),
        },
        _ => PriceResolution::default(),
    }
}

/// Why a variant's stock was forced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOverride {
    EditingPending,
    MissingShipmentsReference,
    MissingShipments,
}

impl StockOverride {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockOverride::EditingPending => "editing_pending",
            StockOverride::MissingShipmentsReference => "missing_shipments_reference",
            StockOverride::MissingShipments => "missing_shipments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockResolution {
    pub quantity: i64,
    pub forced_zero: Option<StockOverride>,
}

pub const EDITING_PENDING: &str = "editing-pending";

/// Resolve the sellable stock of a variant.
///
/// A product that cannot ship is never in stock, whatever the supplier reports.
pub fn resolve_stock(
    raw_stock: Option<i64>,
    resell_status: Option<&str>,
    shipments_reference_id: Option<&str>,
    has_shipments: bool,
) -> StockResolution {
    let forced_zero = if resell_status == Some(EDITING_PENDING) {
        Some(StockOverride::EditingPending)
    } else if shipments_reference_id.is_none_or(|id| id.trim().is_empty()) {
        Some(StockOverride::MissingShipmentsReference)
    } else if !has_shipments {
        Some(StockOverride::MissingShipments)
    } else {
        None
    };

    let quantity = match forced_zero {
        Some(_) => 0,
        None => raw_stock.unwrap_or(0).max(0),
    };

    StockResolution {
        quantity,
        forced_zero,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_scenarios() {
        let cases = [
            (Some(1000), Some(800), (Some(1000), Some(800), Some(800))),
            (Some(800), Some(800), (Some(800), None, Some(800))),
            (None, Some(500), (Some(500), None, Some(500))),
            (None, None, (None, None, None)),
            // non-positive label never produces a markdown
            (Some(0), Some(300), (Some(300), None, Some(300))),
            (Some(700), Some(900), (Some(900), None, Some(900))),
            (Some(1000), None, (None, None, None)),
        ];

        for (label, price, (regular, sale, active)) in cases {
            let resolved = resolve_price(label, price);
            assert_eq!(
                resolved,
                PriceResolution {
                    regular,
                    sale,
                    active
                },
                "label={label:?} price={price:?}"
            );
        }
    }

    #[test]
    fn missing_reference_forces_zero_stock() {
        let resolved = resolve_stock(Some(50), None, Some(""), true);
        assert_eq!(resolved.quantity, 0);
        assert_eq!(
            resolved.forced_zero,
            Some(StockOverride::MissingShipmentsReference)
        );

        let resolved = resolve_stock(Some(50), None, None, true);
        assert_eq!(resolved.quantity, 0);
    }

    #[test]
    fn editing_pending_and_missing_shipments_force_zero() {
        assert_eq!(
            resolve_stock(Some(9), Some(EDITING_PENDING), Some("ref"), true).forced_zero,
            Some(StockOverride::EditingPending)
        );
        assert_eq!(
            resolve_stock(Some(9), Some("active"), Some("ref"), false).forced_zero,
            Some(StockOverride::MissingShipments)
        );
    }

    #[test]
    fn shippable_stock_passes_through_and_clamps_negative() {
        assert_eq!(resolve_stock(Some(12), None, Some("ref"), true).quantity, 12);
        assert_eq!(resolve_stock(Some(-3), None, Some("ref"), true).quantity, 0);
        assert_eq!(resolve_stock(None, None, Some("ref"), true).quantity, 0);
    }
}

//! Coupon catalog.
//!
//! The ordered list of offers this deployment hands out. Order matters: the
//! round-robin allocator walks it front to back.

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use couponbot_common::models::CouponDefinition;

use crate::Error;

pub const FALLBACK_DESCRIPTION: &str = "Special offer";
pub const FALLBACK_DISCOUNT: &str = "Special discount";

#[derive(Debug, Clone)]
pub struct CouponCatalog {
    coupons: Vec<CouponDefinition>,
}

impl Default for CouponCatalog {
    fn default() -> Self {
        Self {
            coupons: vec![
                CouponDefinition::new("SAVE10", "10% off your entire purchase", "10%"),
                CouponDefinition::new("SAVE20", "20% off your entire purchase", "20%"),
                CouponDefinition::new("FREESHIP", "Free shipping on your order", "Free Shipping"),
                CouponDefinition::new("BOGO50", "Buy one, get one 50% off", "50% off second item"),
                CouponDefinition::new("EXTRA15", "Extra 15% off sale items", "15% off sale items"),
            ],
        }
    }
}

impl CouponCatalog {
    /// Builds a catalog, rejecting duplicate codes.
    pub fn new(coupons: Vec<CouponDefinition>) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for coupon in &coupons {
            if !seen.insert(coupon.code.as_str()) {
                return Err(Error::Parse(format!("duplicate coupon code '{}'", coupon.code)));
            }
        }
        Ok(Self { coupons })
    }

    /// Reads a JSON array of `{ code, description, discount_label }` objects.
    pub fn from_json_str(raw: &str) -> Result<Self, Error> {
        let coupons: Vec<CouponDefinition> = serde_json::from_str(raw)?;
        Self::new(coupons)
    }

    pub async fn from_json_file(path: &Path) -> Result<Self, Error> {
        let raw = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_json_str(&raw)?;
        info!("Loaded {} coupon definitions from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.coupons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coupons.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CouponDefinition> {
        self.coupons.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CouponDefinition> {
        self.coupons.iter()
    }

    pub fn find(&self, code: &str) -> Option<&CouponDefinition> {
        self.coupons.iter().find(|c| c.code == code)
    }

    /// Metadata for `code`. Codes the catalog doesn't know (e.g. a pool row
    /// seeded by an older deployment) get a generic description instead of
    /// an error.
    pub fn lookup(&self, code: &str) -> CouponDefinition {
        self.find(code).cloned().unwrap_or_else(|| CouponDefinition {
            code: code.to_string(),
            description: FALLBACK_DESCRIPTION.to_string(),
            discount_label: FALLBACK_DISCOUNT.to_string(),
        })
    }

    pub fn codes(&self) -> Vec<String> {
        self.coupons.iter().map(|c| c.code.clone()).collect()
    }
}

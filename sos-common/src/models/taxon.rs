//! Taxon records as delivered by the taxonomy backbone

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Conservation attributes of a taxon
///
/// Every field is optional so that a taxon can inherit a value from the
/// nearest ancestor that defines it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonAttributes {
    /// Legal protection level (1 = public .. 5 = strictly protected)
    #[serde(default)]
    pub protection_level: Option<u8>,
    /// Red list category, e.g. "EN", "VU", "NT"
    #[serde(default)]
    pub redlist_category: Option<String>,
    /// Conservation lists the taxon belongs to
    #[serde(default)]
    pub conservation_lists: Option<BTreeSet<String>>,
    /// Sensitivity category (1 = not sensitive .. 5 = most sensitive)
    #[serde(default)]
    pub sensitivity_category: Option<u8>,
}

impl TaxonAttributes {
    /// Fill every unset field from `ancestor`
    pub fn inherit_from(&mut self, ancestor: &TaxonAttributes) {
        if self.protection_level.is_none() {
            self.protection_level = ancestor.protection_level;
        }
        if self.redlist_category.is_none() {
            self.redlist_category = ancestor.redlist_category.clone();
        }
        if self.conservation_lists.is_none() {
            self.conservation_lists = ancestor.conservation_lists.clone();
        }
        if self.sensitivity_category.is_none() {
            self.sensitivity_category = ancestor.sensitivity_category;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.protection_level.is_some()
            && self.redlist_category.is_some()
            && self.conservation_lists.is_some()
            && self.sensitivity_category.is_some()
    }
}

/// One node of the classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxon {
    pub id: i32,
    pub scientific_name: String,
    #[serde(default)]
    pub vernacular_name: Option<String>,
    /// Primary parent; `None` only for the root ("Biota")
    #[serde(default)]
    pub parent_id: Option<i32>,
    /// Alternate classification parents
    #[serde(default)]
    pub secondary_parent_ids: BTreeSet<i32>,
    #[serde(default)]
    pub attributes: TaxonAttributes,
}

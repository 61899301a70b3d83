//! Data providers and the provider scope of a processing run

use serde::{Deserialize, Serialize};

/// Highest provider id that fits in a [`ProviderScope`] mask
pub const MAX_PROVIDER_ID: i32 = 63;

/// A biodiversity data provider whose harvested records feed the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProvider {
    /// Provider id, also its bit index in a [`ProviderScope`]
    pub id: i32,
    /// Short stable identifier, e.g. "Artportalen"
    pub identifier: String,
    /// Display name
    pub name: String,
}

/// Set of providers requested for one run, stored as a bitmask
///
/// A generation is only activatable once every provider in the scope
/// has a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderScope(u64);

impl ProviderScope {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_mask(mask: u64) -> Self {
        Self(mask)
    }

    /// Build a scope from provider ids; ids outside 0..=63 are rejected
    pub fn from_ids<I: IntoIterator<Item = i32>>(ids: I) -> crate::Result<Self> {
        let mut scope = Self::empty();
        for id in ids {
            scope.insert(id)?;
        }
        Ok(scope)
    }

    pub fn insert(&mut self, provider_id: i32) -> crate::Result<()> {
        if !(0..=MAX_PROVIDER_ID).contains(&provider_id) {
            return Err(crate::Error::InvalidInput(format!(
                "provider id {} outside scope range 0..={}",
                provider_id, MAX_PROVIDER_ID
            )));
        }
        self.0 |= 1u64 << provider_id;
        Ok(())
    }

    pub fn contains(&self, provider_id: i32) -> bool {
        (0..=MAX_PROVIDER_ID).contains(&provider_id) && self.0 & (1u64 << provider_id) != 0
    }

    pub fn mask(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Provider ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = i32> + '_ {
        (0..=MAX_PROVIDER_ID).filter(move |id| self.contains(*id))
    }
}

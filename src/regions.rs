//! Region registry.
//!
//! A static, immutable mapping of region identifier to storage endpoint,
//! loaded once at startup. Lookups never fail: an unknown region resolves
//! to the designated default region.

use serde::Serialize;

use crate::config::RegionsConfig;

/// A storage region the console can talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub display_name: String,
    pub endpoint: String,
}

/// Immutable region lookup table.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    /// Regions in configured order.
    regions: Vec<Region>,
    /// Index into `regions` of the default region.
    default_index: usize,
}

impl RegionRegistry {
    /// Build a registry from configuration.
    ///
    /// Fails if the list is empty, contains duplicate ids, or the default id
    /// is not one of the listed regions.
    pub fn from_config(config: &RegionsConfig) -> anyhow::Result<Self> {
        let regions: Vec<Region> = config
            .list
            .iter()
            .map(|r| Region {
                id: r.id.clone(),
                display_name: r.display_name.clone(),
                endpoint: r.endpoint.clone(),
            })
            .collect();
        Self::new(regions, &config.default)
    }

    pub fn new(regions: Vec<Region>, default_id: &str) -> anyhow::Result<Self> {
        if regions.is_empty() {
            anyhow::bail!("region registry must contain at least one region");
        }
        for (i, region) in regions.iter().enumerate() {
            if regions[..i].iter().any(|r| r.id == region.id) {
                anyhow::bail!("duplicate region id: {}", region.id);
            }
        }
        let default_index = regions
            .iter()
            .position(|r| r.id == default_id)
            .ok_or_else(|| anyhow::anyhow!("default region {default_id} is not configured"))?;

        Ok(Self {
            regions,
            default_index,
        })
    }

    /// Endpoint for `region_id`, or the default region's endpoint.
    pub fn resolve_endpoint(&self, region_id: &str) -> &str {
        &self.get(region_id).unwrap_or(self.default_region()).endpoint
    }

    pub fn is_valid_region(&self, region_id: &str) -> bool {
        self.get(region_id).is_some()
    }

    /// All regions in configured order.
    pub fn list_regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn get(&self, region_id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == region_id)
    }

    pub fn default_region(&self) -> &Region {
        &self.regions[self.default_index]
    }
}

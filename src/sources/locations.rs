use crate::error::Result;
use crate::traits::RegionLookup;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const LOCATIONS_JSON: &str = include_str!("../../assets/locations.json");

#[derive(Deserialize)]
struct LocationEntry {
    #[serde(default)]
    iata: String,
    #[serde(default)]
    region: String,
}

/// IATA colo code -> region name.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: HashMap<String, String>,
}

impl RegionMap {
    /// Parses a JSON array of `{"iata": .., "region": ..}`; incomplete entries are skipped.
    pub fn from_json(content: &str) -> Result<Self> {
        let entries: Vec<LocationEntry> = serde_json::from_str(content)?;
        let regions = entries
            .into_iter()
            .filter(|e| !e.iata.is_empty() && !e.region.is_empty())
            .map(|e| (e.iata, e.region))
            .collect();
        Ok(Self { regions })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(LOCATIONS_JSON)
    }
}

impl RegionLookup for RegionMap {
    fn region(&self, colo: &str) -> Option<String> {
        self.regions.get(colo).cloned()
    }
}

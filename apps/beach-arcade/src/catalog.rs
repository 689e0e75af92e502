use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::simulation::{test_pattern, SimulationFactory};

/// Public description of a streamable simulation, served by `/game_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInfo {
    #[serde(rename = "type")]
    pub category: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Clone)]
pub struct CatalogEntry {
    pub info: SimulationInfo,
    pub factory: Option<Arc<dyn SimulationFactory>>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown simulation category `{0}`")]
    UnknownCategory(String),
    #[error("unknown simulation `{category}/{id}`")]
    UnknownSimulation { category: String, id: String },
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "simulation")]
    simulations: Vec<SimulationInfo>,
}

/// Descriptors grouped by category, each optionally bound to a factory.
#[derive(Clone, Default)]
pub struct SimulationCatalog {
    entries: BTreeMap<String, BTreeMap<String, CatalogEntry>>,
}

impl SimulationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the simulations compiled into this binary.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            SimulationInfo {
                category: test_pattern::CATEGORY.into(),
                id: test_pattern::ID.into(),
                name: "Test Pattern".into(),
                title: Some("Bouncing test pattern".into()),
                description: Some(
                    "A steerable square over a moving gradient; useful for checking the stream path."
                        .into(),
                ),
                tags: vec!["diagnostic".into()],
                author: Some("beach".into()),
            },
            Arc::new(test_pattern::TestPatternFactory),
        );
        catalog
    }

    pub fn register(&mut self, info: SimulationInfo, factory: Arc<dyn SimulationFactory>) {
        self.insert(info, Some(factory));
    }

    /// Adds a descriptor with no runnable implementation. Negotiating it
    /// fails with an internal error rather than not-found.
    pub fn register_descriptor(&mut self, info: SimulationInfo) {
        self.insert(info, None);
    }

    fn insert(&mut self, info: SimulationInfo, factory: Option<Arc<dyn SimulationFactory>>) {
        let by_id = self.entries.entry(info.category.clone()).or_default();
        if by_id.contains_key(&info.id) {
            warn!(category = %info.category, id = %info.id, "replacing catalog entry");
        }
        by_id.insert(info.id.clone(), CatalogEntry { info, factory });
    }

    /// Merges `[[simulation]]` tables from a TOML file. Entries that match
    /// an already-registered factory only refresh its descriptor.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let file: CatalogFile = toml::from_str(&raw)?;
        let count = file.simulations.len();
        for info in file.simulations {
            let factory = self
                .entries
                .get(&info.category)
                .and_then(|by_id| by_id.get(&info.id))
                .and_then(|entry| entry.factory.clone());
            self.insert(info, factory);
        }
        info!(path = %path.display(), count, "loaded simulation catalog");
        Ok(count)
    }

    pub fn all(&self) -> Vec<SimulationInfo> {
        self.entries
            .values()
            .flat_map(|by_id| by_id.values().map(|e| e.info.clone()))
            .collect()
    }

    pub fn by_category(&self, category: &str) -> Result<Vec<SimulationInfo>, CatalogError> {
        self.entries
            .get(category)
            .map(|by_id| by_id.values().map(|e| e.info.clone()).collect())
            .ok_or_else(|| CatalogError::UnknownCategory(category.to_string()))
    }

    pub fn lookup(&self, category: &str, id: &str) -> Result<&CatalogEntry, CatalogError> {
        let by_id = self
            .entries
            .get(category)
            .ok_or_else(|| CatalogError::UnknownCategory(category.to_string()))?;
        by_id
            .get(id)
            .ok_or_else(|| CatalogError::UnknownSimulation {
                category: category.to_string(),
                id: id.to_string(),
            })
    }
}

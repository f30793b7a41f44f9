//! # Settings
//!
//! The TOML settings file of the `dgm` tool:
//!
//! ```toml
//! [engine]
//! max_expiry_cascade = 3
//! source_reference_field = "_fromSource"
//!
//! [graph]
//! backend = "redb"
//! path = "dgm.redb"
//!
//! [[types]]
//! name = "pages"
//! # ... see `rules`
//! ```
//!
//! Every block is optional. Without `[graph]` the graph lives in memory.

use dgm_core::{Configuration, EngineSettings, Graph, GraphStore, RedbGraph, TypeConfig};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CliError;
use crate::rules::TypeRule;

/// A graph store selected at runtime.
pub type SharedGraph = Arc<RwLock<dyn GraphStore>>;

/// Parsed settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineSettings,
    pub graph: GraphSettings,
    pub types: Vec<TypeRule>,
}

/// Which graph store backs the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum GraphSettings {
    #[default]
    Memory,
    Redb {
        path: PathBuf,
    },
}

impl Settings {
    /// Read and parse a settings file.
    ///
    /// # Errors
    ///
    /// `CliError::Io` if the file cannot be read, `CliError::Settings` if it
    /// is not valid settings TOML.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::Io(format!("Cannot read settings '{}': {}", path.display(), e)))?;
        let settings = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), types = settings.types.len(), "settings loaded");
        Ok(settings)
    }

    /// Parse settings from TOML text.
    ///
    /// # Errors
    ///
    /// `CliError::Settings` on malformed TOML or unknown fields.
    pub fn parse(text: &str) -> Result<Self, CliError> {
        toml::from_str(text).map_err(|e| CliError::Settings(e.to_string()))
    }

    /// Compile the type rules into an engine configuration.
    ///
    /// # Errors
    ///
    /// `DgmError::InvalidConfiguration` (wrapped) when rules clash, such as
    /// two rules sharing a name.
    pub fn configuration(&self) -> Result<Configuration, CliError> {
        let types = self
            .types
            .iter()
            .map(|rule| Arc::new(rule.to_config()) as Arc<dyn TypeConfig>)
            .collect();
        Ok(Configuration::new(types)?)
    }

    /// Open the configured graph store.
    ///
    /// # Errors
    ///
    /// `DgmError::Store` (wrapped) if the redb database cannot be opened.
    pub fn open_graph(&self) -> Result<SharedGraph, CliError> {
        let graph: SharedGraph = match &self.graph {
            GraphSettings::Memory => Arc::new(RwLock::new(Graph::new())),
            GraphSettings::Redb { path } => {
                tracing::info!(path = %path.display(), "opening redb graph");
                Arc::new(RwLock::new(RedbGraph::open(path)?))
            }
        };
        Ok(graph)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let settings = Settings::parse("").expect("parse");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.graph, GraphSettings::Memory);
        assert_eq!(settings.engine, EngineSettings::default());
    }

    #[test]
    fn engine_and_graph_blocks() {
        let settings = Settings::parse(
            r#"
            [engine]
            max_expiry_cascade = 1
            context_depth = 4

            [graph]
            backend = "redb"
            path = "graph.redb"
            "#,
        )
        .expect("parse");

        assert_eq!(settings.engine.max_expiry_cascade, 1);
        assert_eq!(settings.engine.context_depth, 4);
        assert_eq!(settings.engine.max_walk_depth, EngineSettings::default().max_walk_depth);
        assert_eq!(
            settings.graph,
            GraphSettings::Redb {
                path: PathBuf::from("graph.redb")
            }
        );
    }

    #[test]
    fn unknown_block_is_rejected() {
        assert!(matches!(
            Settings::parse("[server]\nport = 1"),
            Err(CliError::Settings(_))
        ));
    }

    #[test]
    fn duplicate_rule_names_are_invalid() {
        let settings = Settings::parse(
            r#"
            [[types]]
            name = "pages"
            source_index = "cms"
            source_type = "page"
            target_index = "site"
            target_type = "page"

            [[types]]
            name = "pages"
            source_index = "cms"
            source_type = "post"
            target_index = "site"
            target_type = "post"
            "#,
        )
        .expect("parse");

        assert!(matches!(
            settings.configuration(),
            Err(CliError::Engine(dgm_core::DgmError::InvalidConfiguration(_)))
        ));
    }
}

//! # Configuration
//!
//! The per-type capability set the engine is driven by, and engine settings.
//!
//! A `TypeConfig` says how documents of one source index/type are turned
//! into a subgraph (`extract`), whether they produce output (`filter`), how
//! the output document is shaped (`transform`), where it is written, and
//! which walks feed derived properties into it. The engine only relies on
//! these function contracts, never on how a configuration is implemented or
//! loaded.
//!
//! `FnTypeConfig`, `FnWalkConfig` and `FnPropertyConfig` implement the
//! traits with closures.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::documents::Document;
use crate::primitives::{
    DEFAULT_CONTEXT_DEPTH, DEFAULT_MAX_EXPIRY_CASCADE, MAX_WALK_DEPTH, SOURCE_REFERENCE_FIELD,
    is_reserved_property,
};
use crate::resolver::ResolvedPathElement;
use crate::subgraph::Subgraph;
use crate::tree::Tree;
use crate::types::{DgmError, Direction};

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// One derived property: a reduction of a resolved walk tree to JSON.
pub trait PropertyConfig: Send + Sync {
    fn name(&self) -> &str;

    /// Reduce the tree (root = the recomputed document) to the property value.
    fn reduce(&self, tree: &Tree<ResolvedPathElement>) -> Result<Value, DgmError>;
}

/// One walk from the recomputed document and the properties computed from it.
pub trait WalkConfig: Send + Sync {
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    /// Depth limit of this walk; the engine default applies when `None`.
    fn max_depth(&self) -> Option<usize> {
        None
    }

    fn properties(&self) -> &BTreeMap<String, Arc<dyn PropertyConfig>>;
}

/// How documents of one source index/type are degraphmalized.
pub trait TypeConfig: Send + Sync {
    fn name(&self) -> &str;

    fn source_index(&self) -> &str;

    fn source_type(&self) -> &str;

    fn target_index(&self) -> &str;

    fn target_type(&self) -> &str;

    /// Relationships and properties the document contributes to the graph.
    fn extract(&self, document: &Document) -> Result<Subgraph, DgmError>;

    /// Shape of the output document, before derived properties are merged in.
    fn transform(&self, document: &Document) -> Result<Value, DgmError>;

    /// Whether the document produces an output document at all.
    fn filter(&self, document: &Document) -> bool;

    fn walks(&self) -> &BTreeMap<String, Arc<dyn WalkConfig>>;
}

// =============================================================================
// CLOSURE-BACKED IMPLEMENTATIONS
// =============================================================================

type ExtractFn = Arc<dyn Fn(&Document) -> Result<Subgraph, DgmError> + Send + Sync>;
type TransformFn = Arc<dyn Fn(&Document) -> Result<Value, DgmError> + Send + Sync>;
type FilterFn = Arc<dyn Fn(&Document) -> bool + Send + Sync>;
type ReduceFn = Arc<dyn Fn(&Tree<ResolvedPathElement>) -> Result<Value, DgmError> + Send + Sync>;

fn extract_nothing(_: &Document) -> Result<Subgraph, DgmError> {
    Ok(Subgraph::default())
}

fn identity_transform(document: &Document) -> Result<Value, DgmError> {
    Ok(document.source.clone())
}

fn accept_all(_: &Document) -> bool {
    true
}

/// A property computed by a closure.
#[derive(Clone)]
pub struct FnPropertyConfig {
    name: String,
    reduce: ReduceFn,
}

impl FnPropertyConfig {
    pub fn new(
        name: impl Into<String>,
        reduce: impl Fn(&Tree<ResolvedPathElement>) -> Result<Value, DgmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reduce: Arc::new(reduce),
        }
    }
}

impl fmt::Debug for FnPropertyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPropertyConfig")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PropertyConfig for FnPropertyConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn reduce(&self, tree: &Tree<ResolvedPathElement>) -> Result<Value, DgmError> {
        (self.reduce)(tree)
    }
}

/// A walk with a fixed direction and a set of properties.
#[derive(Clone)]
pub struct FnWalkConfig {
    name: String,
    direction: Direction,
    max_depth: Option<usize>,
    properties: BTreeMap<String, Arc<dyn PropertyConfig>>,
}

impl FnWalkConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            max_depth: None,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn property(mut self, property: impl PropertyConfig + 'static) -> Self {
        self.properties
            .insert(property.name().to_string(), Arc::new(property));
        self
    }
}

impl fmt::Debug for FnWalkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWalkConfig")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("max_depth", &self.max_depth)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WalkConfig for FnWalkConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    fn properties(&self) -> &BTreeMap<String, Arc<dyn PropertyConfig>> {
        &self.properties
    }
}

/// A type configuration assembled from closures.
///
/// Defaults: empty extraction, identity transform, accept-all filter.
#[derive(Clone)]
pub struct FnTypeConfig {
    name: String,
    source_index: String,
    source_type: String,
    target_index: String,
    target_type: String,
    extract: ExtractFn,
    transform: TransformFn,
    filter: FilterFn,
    walks: BTreeMap<String, Arc<dyn WalkConfig>>,
}

impl FnTypeConfig {
    pub fn new(
        name: impl Into<String>,
        source_index: impl Into<String>,
        source_type: impl Into<String>,
        target_index: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_index: source_index.into(),
            source_type: source_type.into(),
            target_index: target_index.into(),
            target_type: target_type.into(),
            extract: Arc::new(extract_nothing),
            transform: Arc::new(identity_transform),
            filter: Arc::new(accept_all),
            walks: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn extract_with(
        mut self,
        extract: impl Fn(&Document) -> Result<Subgraph, DgmError> + Send + Sync + 'static,
    ) -> Self {
        self.extract = Arc::new(extract);
        self
    }

    #[must_use]
    pub fn transform_with(
        mut self,
        transform: impl Fn(&Document) -> Result<Value, DgmError> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    #[must_use]
    pub fn filter_with(mut self, filter: impl Fn(&Document) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    #[must_use]
    pub fn walk(mut self, walk: impl WalkConfig + 'static) -> Self {
        self.walks.insert(walk.name().to_string(), Arc::new(walk));
        self
    }
}

impl fmt::Debug for FnTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTypeConfig")
            .field("name", &self.name)
            .field("source", &format!("{}/{}", self.source_index, self.source_type))
            .field("target", &format!("{}/{}", self.target_index, self.target_type))
            .field("walks", &self.walks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TypeConfig for FnTypeConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_index(&self) -> &str {
        &self.source_index
    }

    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn target_index(&self) -> &str {
        &self.target_index
    }

    fn target_type(&self) -> &str {
        &self.target_type
    }

    fn extract(&self, document: &Document) -> Result<Subgraph, DgmError> {
        (self.extract)(document)
    }

    fn transform(&self, document: &Document) -> Result<Value, DgmError> {
        (self.transform)(document)
    }

    fn filter(&self, document: &Document) -> bool {
        (self.filter)(document)
    }

    fn walks(&self) -> &BTreeMap<String, Arc<dyn WalkConfig>> {
        &self.walks
    }
}

// =============================================================================
// CONFIGURATION REGISTRY
// =============================================================================

/// The set of type configurations known to the engine.
#[derive(Clone, Default)]
pub struct Configuration {
    types: Vec<Arc<dyn TypeConfig>>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("types", &self.types.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Configuration {
    /// Validate and register a set of type configurations.
    ///
    /// # Errors
    ///
    /// Returns `DgmError::InvalidConfiguration` when two types share a name,
    /// or when a property name is repeated across the walks of one type or
    /// uses the reserved prefix.
    pub fn new(types: Vec<Arc<dyn TypeConfig>>) -> Result<Self, DgmError> {
        let mut names = BTreeSet::new();
        for config in &types {
            if !names.insert(config.name().to_string()) {
                return Err(DgmError::InvalidConfiguration(format!(
                    "duplicate type configuration '{}'",
                    config.name()
                )));
            }
            let mut properties = BTreeSet::new();
            for walk in config.walks().values() {
                for property in walk.properties().keys() {
                    if is_reserved_property(property) {
                        return Err(DgmError::InvalidConfiguration(format!(
                            "property '{}' of type '{}' uses the reserved prefix",
                            property,
                            config.name()
                        )));
                    }
                    if !properties.insert(property.clone()) {
                        return Err(DgmError::InvalidConfiguration(format!(
                            "property '{}' defined twice for type '{}'",
                            property,
                            config.name()
                        )));
                    }
                }
            }
        }
        Ok(Self { types })
    }

    #[must_use]
    pub fn types(&self) -> &[Arc<dyn TypeConfig>] {
        &self.types
    }

    /// Configurations whose source is `index`/`type_name`.
    #[must_use]
    pub fn configs_for(&self, index: &str, type_name: &str) -> Vec<Arc<dyn TypeConfig>> {
        self.types
            .iter()
            .filter(|t| t.source_index() == index && t.source_type() == type_name)
            .cloned()
            .collect()
    }

    /// Like `configs_for`, failing with `ConfigurationMismatch` when none match.
    pub fn require_configs(
        &self,
        index: &str,
        type_name: &str,
    ) -> Result<Vec<Arc<dyn TypeConfig>>, DgmError> {
        let configs = self.configs_for(index, type_name);
        if configs.is_empty() {
            return Err(DgmError::ConfigurationMismatch {
                index: index.to_string(),
                type_name: type_name.to_string(),
            });
        }
        Ok(configs)
    }
}

// =============================================================================
// ENGINE SETTINGS
// =============================================================================

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Default depth of configured walks (clamped to `MAX_WALK_DEPTH`).
    pub max_walk_depth: usize,
    /// Depth of the pre/post context walks.
    pub context_depth: usize,
    /// How many times an expiry may cause a chained resubmission.
    pub max_expiry_cascade: u32,
    /// Field receiving the source identity in target documents; omitted when `None`.
    pub source_reference_field: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_walk_depth: MAX_WALK_DEPTH,
            context_depth: DEFAULT_CONTEXT_DEPTH,
            max_expiry_cascade: DEFAULT_MAX_EXPIRY_CASCADE,
            source_reference_field: Some(SOURCE_REFERENCE_FIELD.to_string()),
        }
    }
}

impl EngineSettings {
    /// Effective depth of a walk.
    #[must_use]
    pub fn walk_depth(&self, walk: &dyn WalkConfig) -> usize {
        walk.max_depth()
            .unwrap_or(self.max_walk_depth)
            .min(MAX_WALK_DEPTH)
    }
}

// =============================================================================
// TESTS
// =============================================================================

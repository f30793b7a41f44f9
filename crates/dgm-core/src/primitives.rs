//! # Engine Primitives
//!
//! Hardcoded runtime constants for the degraphmalizer engine.
//!
//! These values are compiled into the binary. The tunable ones are only
//! defaults: `EngineSettings` may override them at startup.

/// Version reserved for symbolic document identities.
///
/// A vertex at this version is a placeholder: something references the
/// document, but no concrete version of it has been committed yet.
pub const SYMBOLIC_VERSION: u64 = 0;

/// Prefix reserved for engine bookkeeping properties.
///
/// Subgraph property names starting with this prefix are rejected so they can
/// never collide with bookkeeping written by the engine itself.
pub const RESERVED_PROPERTY_PREFIX: &str = "_";

/// Default field under which the source identity is written into target documents.
pub const SOURCE_REFERENCE_FIELD: &str = "_fromSource";

/// Hard maximum depth for any graph walk.
///
/// - All walks must be computationally bounded.
/// - Configured walk depths are clamped to this value.
pub const MAX_WALK_DEPTH: usize = 100;

/// Default depth of the pre/post context walks.
pub const DEFAULT_CONTEXT_DEPTH: usize = MAX_WALK_DEPTH;

/// Default bound on chained resubmissions caused by expired reads.
///
/// An action resubmitted because of an expiry carries its cascade level; once
/// the level reaches this bound further expiries are reported but not
/// resubmitted.
pub const DEFAULT_MAX_EXPIRY_CASCADE: u32 = 3;

/// Returns true when `name` uses the reserved bookkeeping prefix.
#[must_use]
pub fn is_reserved_property(name: &str) -> bool {
    name.starts_with(RESERVED_PROPERTY_PREFIX)
}

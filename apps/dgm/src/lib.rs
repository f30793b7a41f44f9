//! # dgm
//!
//! The `dgm` command line tool: loads declarative type rules from a TOML
//! settings file, replays fixture files through the degraphmalizer engine
//! and verifies the documents it writes.

pub mod cli;
pub mod error;
pub mod fixtures;
pub mod rules;
pub mod settings;

pub use error::CliError;
pub use fixtures::{Fixture, replay, target_documents, verify};
pub use rules::TypeRule;
pub use settings::{GraphSettings, Settings};

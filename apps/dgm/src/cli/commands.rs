//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use dgm_core::{
    DegraphmalizeStatus, Degraphmalizer, LoggingStatus, MemoryDocumentStore, NoopStatus,
};
use std::path::Path;
use std::sync::Arc;

use crate::error::CliError;
use crate::fixtures::{self, Fixture};
use crate::settings::{GraphSettings, Settings};

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Validate settings and list the configured types.
pub fn cmd_check(config: &Path, json_mode: bool) -> Result<(), CliError> {
    let settings = Settings::load(config)?;
    let configuration = settings.configuration()?;

    if json_mode {
        let types: Vec<_> = configuration
            .types()
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "source": format!("{}/{}", t.source_index(), t.source_type()),
                    "target": format!("{}/{}", t.target_index(), t.target_type()),
                    "walks": t.walks().keys().collect::<Vec<_>>(),
                })
            })
            .collect();
        let output = serde_json::json!({
            "config": config.to_string_lossy(),
            "engine": settings.engine,
            "graph": settings.graph,
            "types": types,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("dgm Settings");
    println!("============");
    println!("Config: {:?}", config);
    match &settings.graph {
        GraphSettings::Memory => println!("Graph:  memory"),
        GraphSettings::Redb { path } => println!("Graph:  redb ({:?})", path),
    }
    println!();
    println!("Types: {}", configuration.types().len());
    for t in configuration.types() {
        println!(
            "  {:<16} {}/{} -> {}/{}",
            t.name(),
            t.source_index(),
            t.source_type(),
            t.target_index(),
            t.target_type()
        );
        for (name, walk) in t.walks() {
            let properties: Vec<&str> = walk.properties().keys().map(String::as_str).collect();
            println!(
                "    walk {} ({}): {}",
                name,
                walk.direction(),
                properties.join(", ")
            );
        }
    }

    Ok(())
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Replay a fixture file through the engine and verify the expected documents.
///
/// Fails with `CliError::Mismatch` when any expected document differs.
pub async fn cmd_run(
    config: &Path,
    fixture_path: &Path,
    json_mode: bool,
    verbose: bool,
) -> Result<(), CliError> {
    let settings = Settings::load(config)?;
    let configuration = settings.configuration()?;
    let fixture = Fixture::load(fixture_path)?;

    let documents = Arc::new(MemoryDocumentStore::new());
    fixture.seed(documents.as_ref())?;

    let graph = settings.open_graph()?;
    let engine = Degraphmalizer::start(graph, documents, configuration, settings.engine.clone());
    let status: Arc<dyn DegraphmalizeStatus> = if verbose {
        Arc::new(LoggingStatus)
    } else {
        Arc::new(NoopStatus)
    };

    let reports = fixtures::replay(&engine, &fixture, &status).await?;
    let targets = fixtures::target_documents(&engine);
    let mismatches = fixtures::verify(engine.documents().as_ref(), &fixture.expected)?;

    if json_mode {
        let documents: Vec<_> = targets
            .iter()
            .map(|(id, source)| serde_json::json!({"id": id, "source": source}))
            .collect();
        let output = serde_json::json!({
            "changes": reports,
            "documents": documents,
            "mismatches": mismatches,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        println!("Changes");
        println!("=======");
        for report in &reports {
            let recomputes: Vec<String> = report
                .recomputes
                .iter()
                .map(|(status, count)| format!("{}={}", status, count))
                .collect();
            println!(
                "{:<6} {}  actions={} [{}]",
                report.action,
                report.id,
                report.actions,
                recomputes.join(" ")
            );
            for error in &report.errors {
                println!("       error: {}", error);
            }
        }

        println!();
        println!("Documents");
        println!("=========");
        for (id, source) in &targets {
            println!("{}", id);
            println!(
                "{}",
                serde_json::to_string_pretty(source).unwrap_or_default()
            );
        }

        if !fixture.expected.is_empty() {
            println!();
            println!(
                "Verified {}/{} expected document(s)",
                fixture.expected.len() - mismatches.len(),
                fixture.expected.len()
            );
            for mismatch in &mismatches {
                println!("  MISMATCH {}", mismatch.id);
                println!(
                    "    expected: {}",
                    serde_json::to_string(&mismatch.expected).unwrap_or_default()
                );
                println!(
                    "    actual:   {}",
                    serde_json::to_string(&mismatch.actual).unwrap_or_default()
                );
            }
        }
    }

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(CliError::Mismatch(mismatches.len()))
    }
}

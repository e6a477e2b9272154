//! `schemas` handler: load a schema directory and report per selector.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;
use tracing::warn;

use twinsync_core::schema::{ContentKind, unresolved_references};
use twinsync_core::{FileSchemaStore, ModelSelector, TwinManager};

use crate::cli::{GlobalOpts, SchemasArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SchemaStatus {
    selector: ModelSelector,
    model_id: String,
    file: String,
    loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    telemetry: usize,
    properties: usize,
    commands: usize,
}

#[derive(Tabled)]
struct SchemaRow {
    #[tabled(rename = "Selector")]
    selector: String,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Telemetry")]
    telemetry: usize,
    #[tabled(rename = "Properties")]
    properties: usize,
    #[tabled(rename = "Commands")]
    commands: usize,
}

fn row(s: &SchemaStatus) -> SchemaRow {
    SchemaRow {
        selector: s.selector.to_string(),
        file: s.file.clone(),
        status: s
            .error
            .as_ref()
            .map_or_else(|| "loaded".to_owned(), |e| format!("failed: {e}")),
        telemetry: s.telemetry,
        properties: s.properties,
        commands: s.commands,
    }
}

/// Directory precedence: positional arg, `--schema-dir`, config file.
fn resolve_dir(args: &SchemasArgs, global: &GlobalOpts) -> Result<PathBuf, CliError> {
    if let Some(dir) = args.dir.clone().or_else(|| global.schema_dir.clone()) {
        return Ok(dir);
    }
    let cfg = config::load(global)?;
    cfg.sync.schema_dir.ok_or_else(|| CliError::NoSchemaDir {
        path: config::config_path(global).display().to_string(),
    })
}

pub fn handle(args: &SchemasArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let dir = resolve_dir(args, global)?;
    let store = FileSchemaStore::new(&dir);
    let mut manager = TwinManager::new();
    let report = manager.load_schemas_report(&store);
    let registry = manager.registry();

    let statuses: Vec<SchemaStatus> = ModelSelector::iter()
        .map(|selector| {
            let error = report
                .failed
                .iter()
                .find(|(s, _)| *s == selector)
                .map(|(_, e)| e.clone());
            let descriptors = registry.descriptors_for(selector);
            let count = |kind: ContentKind| descriptors.iter().filter(|d| d.kind == kind).count();
            SchemaStatus {
                selector,
                model_id: selector.model_id().to_string(),
                file: selector.schema_file_name(),
                loaded: error.is_none(),
                error,
                telemetry: count(ContentKind::Telemetry),
                properties: count(ContentKind::Property),
                commands: count(ContentKind::Command),
            }
        })
        .collect();

    let texts: Vec<Arc<str>> = report
        .loaded
        .iter()
        .filter_map(|s| registry.schema_text(&s.model_id()))
        .collect();
    let text_refs: Vec<&str> = texts.iter().map(|t| &**t).collect();
    let unresolved = unresolved_references(&text_refs)?;
    for reference in &unresolved {
        warn!(reference, dir = %dir.display(), "schema extends a model that did not load");
    }

    let out = output::render_list(&global.output, &statuses, row, |s| {
        format!("{}\t{}", s.selector, if s.loaded { "loaded" } else { "failed" })
    })?;
    output::print_output(&out, global.quiet);

    if args.strict && (!report.is_complete() || !unresolved.is_empty()) {
        let mut summary = format!(
            "{} of {} selectors failed to load",
            report.failed.len(),
            statuses.len()
        );
        if !unresolved.is_empty() {
            summary.push_str(&format!("; unresolved: {}", unresolved.join(", ")));
        }
        return Err(CliError::SchemasIncomplete { summary });
    }
    Ok(())
}

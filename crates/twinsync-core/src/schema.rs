// ── Schema documents and stores ──
//
// Schemas are DTDL-style interface documents: an `@id`, optional
// `extends` references and a list of `contents` descriptors. The core
// only needs the descriptors (to build property tables) and the
// reference graph (to check a set of schemas is complete).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use strum::Display;
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::model::ModelSelector;

// ── Descriptors ──────────────────────────────────────────────────────

/// Which role a `contents` entry plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ContentKind {
    Telemetry,
    Property,
    Command,
}

impl ContentKind {
    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "Telemetry" => Some(Self::Telemetry),
            "Property" => Some(Self::Property),
            "Command" => Some(Self::Command),
            _ => None,
        }
    }
}

/// Optional value envelope declared next to a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescriptorBounds {
    pub nominal_delta: Option<f64>,
    pub max_delta: Option<f64>,
    pub nominal_floor: Option<f64>,
    pub nominal_ceiling: Option<f64>,
    pub absolute_floor: Option<f64>,
    pub absolute_ceiling: Option<f64>,
}

/// One telemetry, property or command entry of a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentDescriptor {
    pub kind: ContentKind,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub writable: bool,
    pub command_codes: Vec<i32>,
    pub bounds: DescriptorBounds,
}

/// Parsed schema document.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    pub id: String,
    pub display_name: Option<String>,
    pub extends: Vec<String>,
    pub contents: Vec<ContentDescriptor>,
}

// ── Raw document shape ───────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// `displayName` may be a plain string or a language map.
#[derive(Deserialize)]
#[serde(untagged)]
enum LocalizedText {
    Plain(String),
    Localized(HashMap<String, String>),
}

impl LocalizedText {
    fn into_text(self) -> Option<String> {
        match self {
            Self::Plain(s) => Some(s),
            Self::Localized(map) => map.get("en").cloned().or_else(|| map.into_values().next()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    #[serde(rename = "@id")]
    id: String,
    display_name: Option<LocalizedText>,
    extends: Option<OneOrMany>,
    #[serde(default)]
    contents: Vec<RawContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContent {
    #[serde(rename = "@type")]
    kind: OneOrMany,
    name: String,
    display_name: Option<LocalizedText>,
    description: Option<LocalizedText>,
    unit: Option<String>,
    #[serde(default)]
    writable: bool,
    #[serde(default)]
    command_codes: Vec<i32>,
    #[serde(default)]
    bounds: DescriptorBounds,
}

impl ModelSchema {
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let raw: RawSchema = serde_json::from_str(text).map_err(|e| CoreError::SchemaParse {
            message: e.to_string(),
        })?;

        let contents = raw
            .contents
            .into_iter()
            .filter_map(|content| {
                let types = content.kind.into_vec();
                let Some(kind) = types.iter().find_map(|t| ContentKind::from_type_name(t)) else {
                    trace!(name = %content.name, ?types, "skipping unsupported content entry");
                    return None;
                };
                Some(ContentDescriptor {
                    kind,
                    name: content.name,
                    display_name: content.display_name.and_then(LocalizedText::into_text),
                    description: content.description.and_then(LocalizedText::into_text),
                    unit: content.unit,
                    writable: content.writable,
                    command_codes: content.command_codes,
                    bounds: content.bounds,
                })
            })
            .collect();

        Ok(Self {
            id: raw.id,
            display_name: raw.display_name.and_then(LocalizedText::into_text),
            extends: raw.extends.map(OneOrMany::into_vec).unwrap_or_default(),
            contents,
        })
    }
}

/// Descriptors of `root` plus everything it inherits through `extends`.
///
/// The schema's own descriptors win over inherited ones with the same
/// name. References that `lookup` cannot resolve, or that fail to parse,
/// contribute nothing. Reference cycles are cut.
pub fn resolve_descriptors(
    root: &ModelSchema,
    lookup: &dyn Fn(&str) -> Option<Arc<str>>,
) -> Vec<ContentDescriptor> {
    let mut seen_names = HashSet::new();
    let mut visited = HashSet::from([root.id.clone()]);
    let mut out = Vec::new();
    collect(root, lookup, &mut visited, &mut seen_names, &mut out);
    out
}

fn collect(
    schema: &ModelSchema,
    lookup: &dyn Fn(&str) -> Option<Arc<str>>,
    visited: &mut HashSet<String>,
    seen_names: &mut HashSet<String>,
    out: &mut Vec<ContentDescriptor>,
) {
    for descriptor in &schema.contents {
        if seen_names.insert(descriptor.name.clone()) {
            out.push(descriptor.clone());
        }
    }
    for reference in &schema.extends {
        if !visited.insert(reference.clone()) {
            continue;
        }
        let Some(text) = lookup(reference) else {
            debug!(reference, "extended schema not loaded");
            continue;
        };
        match ModelSchema::parse(&text) {
            Ok(parent) => collect(&parent, lookup, visited, seen_names, out),
            Err(e) => debug!(reference, error = %e, "extended schema unparseable"),
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────

/// `extends` references in `texts` that no document in `texts` declares.
///
/// Documents that fail to parse are reported as `Err`.
pub fn unresolved_references(texts: &[&str]) -> Result<Vec<String>, CoreError> {
    let schemas = texts
        .iter()
        .map(|t| ModelSchema::parse(t))
        .collect::<Result<Vec<_>, _>>()?;
    let declared: HashSet<&str> = schemas.iter().map(|s| s.id.as_str()).collect();

    let mut missing: Vec<String> = schemas
        .iter()
        .flat_map(|s| s.extends.iter())
        .filter(|r| !declared.contains(r.as_str()))
        .cloned()
        .collect();
    missing.sort();
    missing.dedup();
    Ok(missing)
}

/// `true` when every document parses and every reference resolves
/// within the set.
pub fn validate_schemas(texts: &[&str]) -> bool {
    match unresolved_references(texts) {
        Ok(missing) if missing.is_empty() => true,
        Ok(missing) => {
            debug!(?missing, "schema set has unresolved references");
            false
        }
        Err(e) => {
            debug!(error = %e, "schema set has unparseable documents");
            false
        }
    }
}

// ── Stores ───────────────────────────────────────────────────────────

/// Source of raw schema text, one document per selector.
pub trait SchemaStore: Send + Sync {
    fn load_schema_text(&self, selector: ModelSelector) -> Result<String, CoreError>;
}

/// Reads `<dir>/<Selector>.json`.
#[derive(Debug, Clone)]
pub struct FileSchemaStore {
    dir: PathBuf,
}

impl FileSchemaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, selector: ModelSelector) -> PathBuf {
        self.dir.join(selector.schema_file_name())
    }
}

impl SchemaStore for FileSchemaStore {
    fn load_schema_text(&self, selector: ModelSelector) -> Result<String, CoreError> {
        let path = self.path_for(selector);
        std::fs::read_to_string(&path).map_err(|source| CoreError::SchemaRead {
            selector,
            path,
            source,
        })
    }
}

/// In-memory store, mostly for embedding and tests.
impl SchemaStore for HashMap<ModelSelector, String> {
    fn load_schema_text(&self, selector: ModelSelector) -> Result<String, CoreError> {
        self.get(&selector).cloned().ok_or_else(|| CoreError::SchemaRead {
            selector,
            path: PathBuf::from(selector.schema_file_name()),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONTEXT: &str = r#"{
        "@id": "dtmi:twinsync:iot:Context;1",
        "@type": "Interface",
        "contents": [
            {"@type": "Property", "name": "statusCode", "schema": "integer"},
            {"@type": "Telemetry", "name": "value", "displayName": "Base value"}
        ]
    }"#;

    const ENV: &str = r#"{
        "@id": "dtmi:twinsync:iot:EnvSensors;1",
        "@type": "Interface",
        "displayName": {"en": "Environmental sensors"},
        "extends": ["dtmi:twinsync:iot:Context;1"],
        "contents": [
            {"@type": ["Telemetry", "Temperature"], "name": "value", "unit": "degreeCelsius",
             "bounds": {"absoluteFloor": -40.0, "absoluteCeiling": 85.0}},
            {"@type": "Command", "name": "command", "commandCodes": [0, 1]},
            {"@type": "Relationship", "name": "parent"}
        ]
    }"#;

    #[test]
    fn parses_descriptors() {
        let schema = ModelSchema::parse(ENV).unwrap();
        assert_eq!(schema.display_name.as_deref(), Some("Environmental sensors"));
        assert_eq!(schema.extends, vec!["dtmi:twinsync:iot:Context;1".to_owned()]);
        assert_eq!(schema.contents.len(), 2);
        assert_eq!(schema.contents[0].kind, ContentKind::Telemetry);
        assert_eq!(schema.contents[0].bounds.absolute_ceiling, Some(85.0));
        assert_eq!(schema.contents[1].command_codes, vec![0, 1]);
    }

    #[test]
    fn own_descriptors_win_over_inherited() {
        let root = ModelSchema::parse(ENV).unwrap();
        let context: Arc<str> = Arc::from(CONTEXT);
        let lookup = move |id: &str| (id == "dtmi:twinsync:iot:Context;1").then(|| Arc::clone(&context));

        let resolved = resolve_descriptors(&root, &lookup);
        let names: Vec<&str> = resolved.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["value", "command", "statusCode"]);
        assert_eq!(resolved[0].unit.as_deref(), Some("degreeCelsius"));
    }

    #[test]
    fn cycles_are_cut() {
        let a = r#"{"@id": "a", "extends": "b", "contents": [{"@type": "Property", "name": "x"}]}"#;
        let b = r#"{"@id": "b", "extends": "a", "contents": [{"@type": "Property", "name": "y"}]}"#;
        let root = ModelSchema::parse(a).unwrap();
        let lookup = |id: &str| -> Option<Arc<str>> {
            match id {
                "a" => Some(Arc::from(a)),
                "b" => Some(Arc::from(b)),
                _ => None,
            }
        };
        assert_eq!(resolve_descriptors(&root, &lookup).len(), 2);
    }

    #[test]
    fn validation_requires_closed_reference_set() {
        assert!(validate_schemas(&[CONTEXT, ENV]));
        assert!(!validate_schemas(&[ENV]));
        assert_eq!(
            unresolved_references(&[ENV]).unwrap(),
            vec!["dtmi:twinsync:iot:Context;1".to_owned()]
        );
        assert!(!validate_schemas(&[CONTEXT, "not json"]));
        assert!(validate_schemas(&[]));
    }

    #[test]
    fn file_store_reads_selector_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Context.json"), CONTEXT).unwrap();
        let store = FileSchemaStore::new(dir.path());

        assert_eq!(store.load_schema_text(ModelSelector::Context).unwrap(), CONTEXT);
        let err = store.load_schema_text(ModelSelector::EnvSensors).unwrap_err();
        assert!(matches!(err, CoreError::SchemaRead { selector: ModelSelector::EnvSensors, .. }));
    }
}

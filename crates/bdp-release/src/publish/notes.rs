//! Release notes
//!
//! A [`ReleaseNote`] summarizes what changed between two builds: sources
//! added, removed or updated, field mapping changes, and per-source document
//! counts. It is rendered twice, as `release_<version>.txt` for people and
//! `release_<version>.json` for tooling.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::diff::DiffStats;
use crate::error::ReleaseResult;

/// Per-source entry of a build document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub count: u64,
}

/// Description of one completed build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDocument {
    /// Dataset the build belongs to; also the registry source name
    pub source: String,
    pub version: String,
    /// Backend that holds the built index
    pub backend: String,
    pub build_date: DateTime<Utc>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceInfo>,
    /// Field mapping of the built index
    #[serde(default)]
    pub mapping: Value,
    #[serde(default)]
    pub total_documents: u64,
}

impl BuildDocument {
    pub fn load(path: impl AsRef<Path>) -> ReleaseResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub name: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<VersionChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Fields whose type changed
    pub changed: Vec<String>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDelta {
    pub name: String,
    pub old: u64,
    pub new: u64,
    pub delta: i64,
}

impl CountDelta {
    fn new(name: impl Into<String>, old: u64, new: u64) -> Self {
        Self {
            name: name.into(),
            old,
            new,
            delta: signed_difference(old, new),
        }
    }
}

/// `new - old`, saturating at the bounds of `i64`
fn signed_difference(old: u64, new: u64) -> i64 {
    let difference = i128::from(new) - i128::from(old);
    i64::try_from(difference).unwrap_or(if difference > 0 { i64::MAX } else { i64::MIN })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseNote {
    pub source: String,
    pub old_version: Option<String>,
    pub new_version: String,
    pub generated_at: DateTime<Utc>,
    pub sources: SourceChanges,
    pub fields: FieldChanges,
    pub counts: Vec<CountDelta>,
    pub total: CountDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffStats>,
}

impl ReleaseNote {
    /// Compare two builds. `old` is `None` for a first release.
    pub fn between(old: Option<&BuildDocument>, new: &BuildDocument, diff: Option<&DiffStats>) -> Self {
        let empty = BTreeMap::new();
        let old_sources = old.map(|b| &b.sources).unwrap_or(&empty);

        let mut sources = SourceChanges::default();
        let mut counts = Vec::new();

        let names: BTreeSet<&String> = old_sources.keys().chain(new.sources.keys()).collect();
        for name in names {
            match (old_sources.get(name), new.sources.get(name)) {
                (None, Some(info)) => {
                    sources.added.push(name.clone());
                    counts.push(CountDelta::new(name, 0, info.count));
                },
                (Some(info), None) => {
                    sources.removed.push(name.clone());
                    counts.push(CountDelta::new(name, info.count, 0));
                },
                (Some(before), Some(after)) => {
                    if before.version != after.version {
                        sources.updated.push(VersionChange {
                            name: name.clone(),
                            old: before.version.clone(),
                            new: after.version.clone(),
                        });
                    }
                    if before.count != after.count {
                        counts.push(CountDelta::new(name, before.count, after.count));
                    }
                },
                (None, None) => {},
            }
        }

        let old_fields = old.map(|b| flatten_mapping(&b.mapping)).unwrap_or_default();
        let new_fields = flatten_mapping(&new.mapping);
        let mut fields = FieldChanges::default();
        for (path, kind) in &new_fields {
            match old_fields.get(path) {
                None => fields.added.push(path.clone()),
                Some(previous) if previous != kind => fields.changed.push(path.clone()),
                Some(_) => {},
            }
        }
        fields.removed = old_fields
            .keys()
            .filter(|path| !new_fields.contains_key(*path))
            .cloned()
            .collect();

        Self {
            source: new.source.clone(),
            old_version: old.map(|b| b.version.clone()),
            new_version: new.version.clone(),
            generated_at: Utc::now(),
            sources,
            fields,
            counts,
            total: CountDelta::new(
                "total",
                old.map(|b| b.total_documents).unwrap_or(0),
                new.total_documents,
            ),
            diff: diff.cloned(),
        }
    }

    pub fn to_json(&self) -> ReleaseResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Human-readable rendering
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let title = match &self.old_version {
            Some(old) => format!("{} {} -> {}", self.source, old, self.new_version),
            None => format!("{} {}", self.source, self.new_version),
        };
        let _ = writeln!(out, "{}", title);
        let _ = writeln!(out, "{}", "=".repeat(title.len()));
        let _ = writeln!(out, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out);

        let s = &self.sources;
        if s.added.is_empty() && s.removed.is_empty() && s.updated.is_empty() {
            let _ = writeln!(out, "Sources: no changes");
        } else {
            let _ = writeln!(out, "Sources:");
            for name in &s.added {
                let _ = writeln!(out, "  + {}", name);
            }
            for name in &s.removed {
                let _ = writeln!(out, "  - {}", name);
            }
            for change in &s.updated {
                let _ = writeln!(
                    out,
                    "  * {}: {} -> {}",
                    change.name,
                    change.old.as_deref().unwrap_or("?"),
                    change.new.as_deref().unwrap_or("?")
                );
            }
        }
        let _ = writeln!(out);

        if self.fields.is_empty() {
            let _ = writeln!(out, "Mapping: no changes");
        } else {
            let _ = writeln!(out, "Mapping:");
            for field in &self.fields.added {
                let _ = writeln!(out, "  + {}", field);
            }
            for field in &self.fields.removed {
                let _ = writeln!(out, "  - {}", field);
            }
            for field in &self.fields.changed {
                let _ = writeln!(out, "  * {}", field);
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Documents:");
        for count in &self.counts {
            let _ = writeln!(out, "  {}: {} -> {} ({:+})", count.name, count.old, count.new, count.delta);
        }
        let _ = writeln!(
            out,
            "  total: {} -> {} ({:+})",
            self.total.old, self.total.new, self.total.delta
        );

        if let Some(diff) = &self.diff {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Diff: {} added, {} deleted, {} updated{}",
                diff.add,
                diff.delete,
                diff.update,
                if diff.mapping_changed { ", mapping changed" } else { "" }
            );
        }

        out
    }
}

/// Flatten an index mapping into `dotted.path -> type`.
///
/// Objects carrying `properties` are descended into; an object with a `type`
/// is a leaf.
pub fn flatten_mapping(mapping: &Value) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    flatten_into("", mapping, &mut fields);
    fields
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    let Value::Object(map) = value else {
        if !prefix.is_empty() && !value.is_null() {
            out.insert(prefix.to_string(), value.to_string());
        }
        return;
    };

    if let Some(Value::Object(properties)) = map.get("properties") {
        for (name, child) in properties {
            flatten_into(&join(prefix, name), child, out);
        }
        return;
    }

    if let Some(kind) = map.get("type").and_then(Value::as_str) {
        if !prefix.is_empty() {
            out.insert(prefix.to_string(), kind.to_string());
        }
        return;
    }

    for (name, child) in map {
        flatten_into(&join(prefix, name), child, out);
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(version: &str, sources: &[(&str, &str, u64)], mapping: Value) -> BuildDocument {
        BuildDocument {
            source: "mygene".into(),
            version: version.into(),
            backend: format!("mygene_{}", version),
            build_date: Utc::now(),
            sources: sources
                .iter()
                .map(|(n, v, c)| {
                    (
                        n.to_string(),
                        SourceInfo {
                            version: Some(v.to_string()),
                            count: *c,
                        },
                    )
                })
                .collect(),
            mapping,
            total_documents: sources.iter().map(|(_, _, c)| c).sum(),
        }
    }

    #[test]
    fn test_flatten_mapping() {
        let mapping = json!({
            "properties": {
                "symbol": {"type": "keyword"},
                "go": {"properties": {"BP": {"properties": {"id": {"type": "keyword"}}}}}
            }
        });
        let flat = flatten_mapping(&mapping);
        assert_eq!(flat.get("symbol").map(String::as_str), Some("keyword"));
        assert_eq!(flat.get("go.BP.id").map(String::as_str), Some("keyword"));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_note_between_builds() {
        let old = build(
            "20240101",
            &[("ensembl", "110", 100), ("refseq", "220", 50)],
            json!({"properties": {"symbol": {"type": "text"}, "old": {"type": "long"}}}),
        );
        let new = build(
            "20240115",
            &[("ensembl", "111", 120), ("uniprot", "2024_01", 30)],
            json!({"properties": {"symbol": {"type": "keyword"}, "taxid": {"type": "integer"}}}),
        );

        let note = ReleaseNote::between(Some(&old), &new, None);
        assert_eq!(note.sources.added, vec!["uniprot"]);
        assert_eq!(note.sources.removed, vec!["refseq"]);
        assert_eq!(note.sources.updated.len(), 1);
        assert_eq!(note.sources.updated[0].new.as_deref(), Some("111"));
        assert_eq!(note.fields.added, vec!["taxid"]);
        assert_eq!(note.fields.removed, vec!["old"]);
        assert_eq!(note.fields.changed, vec!["symbol"]);
        assert_eq!(note.total.delta, 0);

        let ensembl = note.counts.iter().find(|c| c.name == "ensembl").unwrap();
        assert_eq!(ensembl.delta, 20);

        let text = note.render_text();
        assert!(text.starts_with("mygene 20240101 -> 20240115"));
        assert!(text.contains("  + uniprot"));
        assert!(text.contains("ensembl: 100 -> 120 (+20)"));
    }

    #[test]
    fn test_first_release_note() {
        let new = build("20240101", &[("ensembl", "110", 10)], Value::Null);
        let note = ReleaseNote::between(None, &new, None);
        assert!(note.old_version.is_none());
        assert_eq!(note.sources.added, vec!["ensembl"]);
        assert!(note.fields.is_empty());
        assert!(note.render_text().contains("Mapping: no changes"));
    }

    #[test]
    fn test_count_delta_beyond_i64() {
        let huge = u64::MAX - 1;
        assert_eq!(CountDelta::new("x", 0, huge).delta, i64::MAX);
        assert_eq!(CountDelta::new("x", huge, 0).delta, i64::MIN);
        assert_eq!(CountDelta::new("x", huge, u64::MAX).delta, 1);
        assert_eq!(CountDelta::new("x", u64::MAX, huge).delta, -1);
        assert_eq!(CountDelta::new("x", 0, i64::MAX as u64).delta, i64::MAX);
    }
}

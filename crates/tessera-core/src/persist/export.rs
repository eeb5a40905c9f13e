//! Derived export: per-table JSON, binary snapshots and a hash manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::write_atomic;
use crate::cache::{VariantSnapshot, materialize};
use crate::error::ErrorCode;
use crate::model::{CellValue, ColumnId, Project, Table, VariantId};

/// Where an export writes. Unset outputs are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub binary_output_path: Option<PathBuf>,
    pub live_binary_output_path: Option<PathBuf>,
    pub generated_output_directory: Option<PathBuf>,
    pub write_manifest: bool,
}

impl ExportOptions {
    #[must_use]
    pub const fn has_outputs(&self) -> bool {
        self.binary_output_path.is_some()
            || self.live_binary_output_path.is_some()
            || self.generated_output_directory.is_some()
    }
}

/// Result of an export that ran to completion. Individual artifacts may
/// still have failed; those are listed in `diagnostics`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOutcome {
    pub has_errors: bool,
    pub diagnostics: Vec<String>,
    pub files: Vec<PathBuf>,
}

impl ExportOutcome {
    fn diagnostic(&mut self, message: String) {
        tracing::warn!(%message, "export diagnostic");
        self.has_errors = true;
        self.diagnostics.push(message);
    }

    #[must_use]
    pub fn first_error(&self) -> Option<&str> {
        self.diagnostics.first().map(String::as_str)
    }
}

/// Export failures that abort the whole run.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no export outputs are configured")]
    NotConfigured,

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode export: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ExportError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ExportFailed
    }
}

/// Produces derived artifacts from a project.
pub trait ExportPipeline: Send {
    /// Export `project` to the outputs in `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] if the export could not run at all.
    /// Per-artifact failures are reported through [`ExportOutcome`].
    fn export(
        &self,
        project: &Project,
        options: &ExportOptions,
    ) -> Result<ExportOutcome, ExportError>;
}

/// Writes every table (and each of its variants) as JSON.
///
/// Layout under `generated_output_directory`:
///
/// ```text
/// <table>.json
/// variants/<table>--<variant>.json
/// manifest.json
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExportPipeline;

#[derive(Serialize)]
struct ExportedColumn<'a> {
    id: ColumnId,
    name: &'a str,
}

#[derive(Serialize)]
struct ExportedTable<'a> {
    table: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variant: Option<&'a str>,
    columns: Vec<ExportedColumn<'a>>,
    rows: Vec<BTreeMap<&'a str, &'a CellValue>>,
}

#[derive(Serialize)]
struct ManifestEntry {
    path: String,
    blake3: String,
    bytes: usize,
}

#[derive(Serialize)]
struct Manifest {
    generated_at: String,
    files: Vec<ManifestEntry>,
}

impl ExportPipeline for JsonExportPipeline {
    fn export(
        &self,
        project: &Project,
        options: &ExportOptions,
    ) -> Result<ExportOutcome, ExportError> {
        if !options.has_outputs() {
            return Err(ExportError::NotConfigured);
        }
        let mut outcome = ExportOutcome::default();

        if options.binary_output_path.is_some() || options.live_binary_output_path.is_some() {
            let snapshot = serde_json::to_vec(project)?;
            for path in [&options.binary_output_path, &options.live_binary_output_path]
                .into_iter()
                .flatten()
            {
                write_atomic(path, &snapshot).map_err(|source| ExportError::Io {
                    path: path.clone(),
                    source,
                })?;
                outcome.files.push(path.clone());
            }
        }

        if let Some(dir) = &options.generated_output_directory {
            let generated = export_tables(project, dir, &mut outcome)?;
            if options.write_manifest {
                let path = dir.join("manifest.json");
                let manifest = Manifest {
                    generated_at: Utc::now().to_rfc3339(),
                    files: generated,
                };
                let body = serde_json::to_vec_pretty(&manifest)?;
                write_atomic(&path, &body).map_err(|source| ExportError::Io {
                    path: path.clone(),
                    source,
                })?;
                outcome.files.push(path);
            }
        }

        tracing::info!(
            files = outcome.files.len(),
            has_errors = outcome.has_errors,
            "export finished"
        );
        Ok(outcome)
    }
}

fn export_tables(
    project: &Project,
    dir: &Path,
    outcome: &mut ExportOutcome,
) -> Result<Vec<ManifestEntry>, ExportError> {
    let variants_dir = dir.join("variants");
    fs::create_dir_all(&variants_dir).map_err(|source| ExportError::Io {
        path: variants_dir.clone(),
        source,
    })?;

    let mut used = BTreeSet::new();
    let mut entries = Vec::new();
    for table in &project.tables {
        let stem = unique_stem(&mut used, table);
        let variants =
            std::iter::once(VariantId::DEFAULT).chain(table.variants.iter().map(|v| v.id));
        for variant in variants {
            let Some(snapshot) = materialize(table, variant) else {
                continue;
            };
            let relative = if variant.is_default() {
                PathBuf::from(format!("{stem}.json"))
            } else {
                let name = table.variant(variant).map_or("", |v| v.name.as_str());
                Path::new("variants").join(format!("{stem}--{}.json", sanitize(name, variant)))
            };
            match write_table(&snapshot, table, &dir.join(&relative)) {
                Ok((hash, bytes)) => {
                    outcome.files.push(dir.join(&relative));
                    entries.push(ManifestEntry {
                        path: relative.to_string_lossy().replace('\\', "/"),
                        blake3: hash,
                        bytes,
                    });
                }
                Err(err) => outcome.diagnostic(format!("{} ({variant}): {err}", table.name)),
            }
        }
    }
    Ok(entries)
}

fn write_table(
    snapshot: &VariantSnapshot,
    base: &Table,
    path: &Path,
) -> anyhow::Result<(String, usize)> {
    let columns = &snapshot.table.columns;
    let exported = ExportedTable {
        table: &base.name,
        variant: base.variant(snapshot.variant).map(|v| v.name.as_str()),
        columns: columns
            .iter()
            .map(|c| ExportedColumn {
                id: c.id,
                name: &c.name,
            })
            .collect(),
        rows: snapshot
            .table
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.name.as_str(), &row.cell(c.id).value))
                    .collect()
            })
            .collect(),
    };
    let body = serde_json::to_vec_pretty(&exported)?;
    write_atomic(path, &body)?;
    Ok((format!("blake3:{}", blake3::hash(&body).to_hex()), body.len()))
}

fn unique_stem(used: &mut BTreeSet<String>, table: &Table) -> String {
    let mut stem = sanitize(&table.name, table.id);
    if !used.insert(stem.clone()) {
        stem = format!("{stem}-{}", table.id);
        used.insert(stem.clone());
    }
    stem
}

/// File-name-safe form of `name`, falling back to the entity id.
fn sanitize(name: &str, fallback: impl std::fmt::Display) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Row, RowId, TableId, VariantDelta};
    use chrono::DateTime;

    fn project() -> Project {
        let mut t = Table::new(TableId(1), "Parts List");
        t.columns.push(Column::value(ColumnId(1), "Qty"));
        t.rows
            .push(Row::new(RowId(1)).with(ColumnId(1), CellValue::Number(3.0)));
        let mut v = VariantDelta::new(VariantId(1), "double");
        v.set_override(RowId(1), ColumnId(1), Some(CellValue::Number(6.0)));
        t.variants.push(v);
        let mut p = Project::new();
        p.tables.push(t);
        p.tables.push(Table::new(TableId(2), "Parts List"));
        p
    }

    #[test]
    fn unconfigured_export_is_rejected() {
        let err = JsonExportPipeline
            .export(&project(), &ExportOptions::default())
            .expect_err("no outputs");
        assert!(matches!(err, ExportError::NotConfigured));
        assert_eq!(err.code(), ErrorCode::ExportFailed);
    }

    #[test]
    fn writes_tables_variants_and_manifest() -> Result<(), ExportError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = ExportOptions {
            generated_output_directory: Some(dir.path().to_path_buf()),
            binary_output_path: Some(dir.path().join("snapshot.bin")),
            write_manifest: true,
            ..ExportOptions::default()
        };
        let outcome = JsonExportPipeline.export(&project(), &options)?;
        assert!(!outcome.has_errors);
        assert!(dir.path().join("Parts_List.json").exists());
        assert!(dir.path().join("Parts_List-t2.json").exists());
        let variant = dir.path().join("variants/Parts_List--double.json");
        let body: serde_json::Value =
            serde_json::from_slice(&fs::read(&variant).expect("read variant"))?;
        assert_eq!(body["variant"], "double");
        assert_eq!(body["rows"][0]["Qty"]["value"], 6.0);

        let manifest: serde_json::Value = serde_json::from_slice(
            &fs::read(dir.path().join("manifest.json")).expect("read manifest"),
        )?;
        let files = manifest["files"].as_array().expect("files");
        assert_eq!(files.len(), 3);
        assert!(files[0]["blake3"].as_str().is_some_and(|h| h.starts_with("blake3:")));
        assert!(
            DateTime::parse_from_rfc3339(manifest["generated_at"].as_str().expect("ts")).is_ok()
        );

        let snapshot: Project =
            serde_json::from_slice(&fs::read(dir.path().join("snapshot.bin")).expect("read"))?;
        assert_eq!(snapshot, project());
        Ok(())
    }

    #[test]
    fn table_write_failure_becomes_diagnostic() -> Result<(), ExportError> {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory where the table file should go makes that write fail.
        fs::create_dir_all(dir.path().join("Parts_List.json")).expect("mkdir");
        let options = ExportOptions {
            generated_output_directory: Some(dir.path().to_path_buf()),
            write_manifest: false,
            ..ExportOptions::default()
        };
        let outcome = JsonExportPipeline.export(&project(), &options)?;
        assert!(outcome.has_errors);
        assert!(outcome.first_error().is_some_and(|e| e.contains("Parts List")));
        assert!(dir.path().join("variants/Parts_List--double.json").exists());
        Ok(())
    }

    #[test]
    fn sanitize_falls_back_to_id() {
        assert_eq!(sanitize("a/b c", TableId(1)), "a_b_c");
        assert_eq!(sanitize("  ", TableId(7)), "t7");
    }
}

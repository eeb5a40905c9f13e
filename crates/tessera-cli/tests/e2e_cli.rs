//! End-to-end tests for the `tessera` binary.
//!
//! Each test writes a project and a command batch into a temp directory and
//! runs the binary as a subprocess against them.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tessera_core::Command as Edit;
use tessera_core::model::{
    Block, BlockId, BlockKind, CellValue, Column, ColumnId, Document, DocumentId, Project, Row,
    RowId, Table, TableId,
};
use tessera_core::persist::{JsonProjectSerializer, ProjectSerializer};

const PARTS: TableId = TableId(1);
const QTY: ColumnId = ColumnId(1);

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn tessera(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tessera"));
    cmd.current_dir(dir);
    cmd.env("TESSERA_LOG", "error");
    cmd
}

fn project() -> Project {
    let mut parts = Table::new(PARTS, "Parts");
    parts.columns.push(Column::value(QTY, "Qty"));
    parts
        .columns
        .push(Column::formula(ColumnId(2), "Total", "thisRow.Qty * 2"));
    for (id, qty) in [(1, 3.0), (2, 1.0)] {
        parts
            .rows
            .push(Row::new(RowId(id)).with(QTY, CellValue::Number(qty)));
    }
    let mut doc = Document::new(DocumentId(1), "Summary");
    doc.blocks
        .push(Block::new(BlockId(1), BlockKind::Variable, "Parts.Total"));

    let mut project = Project::new();
    project.tables.push(parts);
    project.documents.push(doc);
    project
}

/// Write the fixture project and `batch` into `dir`.
fn setup(dir: &Path, batch: impl FnOnce(&Project) -> Vec<Edit>) -> (PathBuf, PathBuf) {
    let project = project();
    let project_path = dir.join("sheet.json");
    JsonProjectSerializer::default()
        .save(&project, &project_path)
        .expect("write project");
    let commands_path = dir.join("batch.json");
    fs::write(
        &commands_path,
        serde_json::to_vec_pretty(&batch(&project)).expect("serialize batch"),
    )
    .expect("write batch");
    (project_path, commands_path)
}

fn set_qty(project: &Project, row: u64, value: f64) -> Edit {
    Edit::set_cell_value(project, PARTS, RowId(row), QTY, CellValue::Number(value))
        .expect("build edit")
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("tessera should not crash");
    assert!(
        output.status.success(),
        "tessera failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

fn qty_on_disk(path: &Path, row: u64) -> CellValue {
    JsonProjectSerializer::default()
        .load(path)
        .expect("load")
        .table(PARTS)
        .and_then(|t| t.row(RowId(row)))
        .map(|r| r.cell(QTY).value.clone())
        .expect("cell")
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

#[test]
fn plan_value_edit_is_incremental() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| vec![set_qty(p, 1, 9.0)]);

    let json = json_stdout(tessera(dir.path()).args([
        "plan",
        "--project",
        arg(&project),
        "--commands",
        arg(&commands),
        "--json",
    ]));
    assert_eq!(json["mode"], "incremental");
    assert_eq!(json["commands"], 1);
    assert_eq!(json["dirty_tables"], serde_json::json!([1]));
    assert_eq!(json["dirty_documents"], serde_json::json!([]));

    // Planning never writes the project.
    assert_eq!(qty_on_disk(&project, 1), CellValue::Number(3.0));
}

#[test]
fn plan_rename_widens_to_documents() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| {
        vec![Edit::rename_column(p, PARTS, QTY, "Count").expect("rename")]
    });

    let json = json_stdout(tessera(dir.path()).args([
        "--json",
        "plan",
        "--project",
        arg(&project),
        "--commands",
        arg(&commands),
    ]));
    assert_eq!(json["mode"], "structural_incremental");
    assert_eq!(json["dirty_documents"], serde_json::json!([1]));
}

#[test]
fn plan_human_output_names_the_mode() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| vec![set_qty(p, 2, 5.0)]);

    tessera(dir.path())
        .args(["plan", "--project", arg(&project), "--commands", arg(&commands)])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode:").and(predicate::str::contains("incremental")));
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

#[test]
fn apply_with_save_writes_the_project() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) =
        setup(dir.path(), |p| vec![set_qty(p, 1, 7.0), set_qty(p, 2, 8.0)]);

    let json = json_stdout(tessera(dir.path()).args([
        "apply",
        "--project",
        arg(&project),
        "--commands",
        arg(&commands),
        "--save",
        "--json",
    ]));
    assert_eq!(json["saved"], true);
    assert_eq!(json["structural"], 2);
    assert_eq!(qty_on_disk(&project, 1), CellValue::Number(7.0));
    assert_eq!(qty_on_disk(&project, 2), CellValue::Number(8.0));
}

#[test]
fn apply_without_save_leaves_the_file_alone() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| vec![set_qty(p, 1, 7.0)]);

    tessera(dir.path())
        .args(["apply", "--project", arg(&project), "--commands", arg(&commands)])
        .assert()
        .success()
        .stdout(predicate::str::contains("saved:").and(predicate::str::contains("no")));
    assert_eq!(qty_on_disk(&project, 1), CellValue::Number(3.0));
}

#[test]
fn apply_rejected_batch_reports_code() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| {
        vec![
            set_qty(p, 1, 7.0),
            Edit::MoveRow {
                table: PARTS,
                from: 0,
                to: 40,
            },
        ]
    });

    tessera(dir.path())
        .args([
            "apply",
            "--project",
            arg(&project),
            "--commands",
            arg(&commands),
            "--save",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2007"));
    assert_eq!(qty_on_disk(&project, 1), CellValue::Number(3.0));
}

#[test]
fn apply_rejects_stale_before_state() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| {
        let mut edit = set_qty(p, 1, 7.0);
        if let Edit::SetCell { before, .. } = &mut edit {
            before.value = CellValue::Number(100.0);
        }
        vec![edit]
    });

    tessera(dir.path())
        .args([
            "apply",
            "--project",
            arg(&project),
            "--commands",
            arg(&commands),
            "--save",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2008"));
    assert_eq!(qty_on_disk(&project, 1), CellValue::Number(3.0));
}

#[test]
fn apply_export_without_outputs_fails() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| vec![set_qty(p, 1, 7.0)]);

    tessera(dir.path())
        .args([
            "apply",
            "--project",
            arg(&project),
            "--commands",
            arg(&commands),
            "--export",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no export outputs"));
}

#[test]
fn apply_export_to_directory() {
    let dir = TempDir::new().expect("tempdir");
    let out = dir.path().join("build");
    let (project, commands) = setup(dir.path(), |p| vec![set_qty(p, 1, 12.0)]);

    let json = json_stdout(tessera(dir.path()).args([
        "apply",
        "--project",
        arg(&project),
        "--commands",
        arg(&commands),
        "--export",
        "--out",
        arg(&out),
        "--json",
    ]));
    assert_eq!(json["exported"], true);

    let table: Value =
        serde_json::from_slice(&fs::read(out.join("Parts.json")).expect("table file"))
            .expect("json");
    assert_eq!(table["rows"][0]["Qty"]["value"], 12.0);
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

#[test]
fn export_writes_tables_and_manifest() {
    let dir = TempDir::new().expect("tempdir");
    let out = dir.path().join("out");
    let (project, _) = setup(dir.path(), |_| Vec::new());

    tessera(dir.path())
        .args(["export", "--project", arg(&project), "--out", arg(&out)])
        .assert()
        .success();

    assert!(out.join("Parts.json").is_file());
    let manifest: Value =
        serde_json::from_slice(&fs::read(out.join("manifest.json")).expect("manifest"))
            .expect("json");
    let first = &manifest["files"][0];
    assert_eq!(first["path"], "Parts.json");
    assert!(
        first["blake3"]
            .as_str()
            .is_some_and(|h| h.starts_with("blake3:"))
    );
}

#[test]
fn export_can_skip_manifest() {
    let dir = TempDir::new().expect("tempdir");
    let out = dir.path().join("out");
    let (project, _) = setup(dir.path(), |_| Vec::new());

    tessera(dir.path())
        .args([
            "export",
            "--project",
            arg(&project),
            "--out",
            arg(&out),
            "--no-manifest",
        ])
        .assert()
        .success();
    assert!(out.join("Parts.json").is_file());
    assert!(!out.join("manifest.json").exists());
}

// ---------------------------------------------------------------------------
// undo-check
// ---------------------------------------------------------------------------

#[test]
fn undo_check_reports_restored() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| {
        vec![
            set_qty(p, 1, 4.0),
            Edit::remove_row(p, PARTS, RowId(2)).expect("remove"),
            Edit::rename_column(p, PARTS, QTY, "Count").expect("rename"),
        ]
    });

    let json = json_stdout(tessera(dir.path()).args([
        "undo-check",
        "--project",
        arg(&project),
        "--commands",
        arg(&commands),
        "--json",
    ]));
    assert_eq!(json["restored"], true);
    assert_eq!(json["differing_tables"], serde_json::json!([]));
    assert_eq!(json["structural"], 3);
}

#[test]
fn missing_project_file_fails() {
    let dir = TempDir::new().expect("tempdir");
    let (_, commands) = setup(dir.path(), |_| Vec::new());

    tessera(dir.path())
        .args([
            "plan",
            "--project",
            "does-not-exist.json",
            "--commands",
            arg(&commands),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001"))
        .stderr(predicate::str::contains("does-not-exist.json"));
}

#[test]
fn malformed_config_reports_config_code() {
    let dir = TempDir::new().expect("tempdir");
    let (project, commands) = setup(dir.path(), |p| vec![set_qty(p, 1, 7.0)]);
    fs::create_dir_all(dir.path().join(".tessera")).expect("mkdir");
    fs::write(dir.path().join(".tessera/config.toml"), "[autosave\n").expect("write config");

    tessera(dir.path())
        .args([
            "apply",
            "--project",
            arg(&project),
            "--commands",
            arg(&commands),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1002"))
        .stderr(predicate::str::contains("config.toml"));
    assert_eq!(qty_on_disk(&project, 1), CellValue::Number(3.0));
}

pub mod apply;
pub mod export;
pub mod plan;
pub mod undo_check;

use std::fs;
use std::path::Path;

use anyhow::Context as _;
use tessera_core::config::ConfigLoadFailed;
use tessera_core::error::ErrorCode;
use tessera_core::metrics::Metrics;
use tessera_core::model::Project;
use tessera_core::persist::{JsonProjectSerializer, ProjectSerializer, SerializeError};
use tessera_core::{ApplyError, Command, Workspace, WorkspaceError};

use crate::output::{CliError, OutputMode, render_error};

/// Read a JSON array of commands.
pub fn load_commands(path: &Path) -> anyhow::Result<Vec<Command>> {
    let raw = fs::read(path)
        .with_context(|| format!("failed to read commands file {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse commands file {}", path.display()))
}

/// Open the workspace for `path`. Config and load failures are reported
/// with their stable codes.
pub fn open_workspace(path: &Path, output: OutputMode) -> anyhow::Result<Workspace> {
    Workspace::open(path).map_err(|err| report_load_error(output, err))
}

/// Load a project file without starting a workspace.
pub fn load_project(path: &Path, output: OutputMode) -> anyhow::Result<Project> {
    JsonProjectSerializer::default()
        .load(path)
        .map_err(|err| report_load_error(output, err.into()))
}

fn load_error_code(err: &anyhow::Error) -> ErrorCode {
    if let Some(config) = err.downcast_ref::<ConfigLoadFailed>() {
        config.code()
    } else if let Some(load) = err.downcast_ref::<SerializeError>() {
        load.code()
    } else if let Some(workspace) = err.downcast_ref::<WorkspaceError>() {
        workspace.code()
    } else {
        ErrorCode::ProjectLoadFailed
    }
}

fn report_load_error(output: OutputMode, err: anyhow::Error) -> anyhow::Error {
    let code = load_error_code(&err);
    match render_error(output, &CliError::coded(code, format!("{err:#}"))) {
        Ok(()) => err,
        Err(render_err) => render_err,
    }
}

/// Report a rejected batch and turn it into the process error.
pub fn reject(output: OutputMode, err: &ApplyError) -> anyhow::Error {
    if let Err(render_err) = render_error(output, &CliError::coded(err.code(), err.to_string())) {
        return render_err;
    }
    anyhow::anyhow!("batch rejected: {err}")
}

/// Timing and counter summary for `--verbose`.
pub fn print_metrics(metrics: &Metrics) -> anyhow::Result<()> {
    let report = metrics.report();
    eprintln!("timing report:");
    eprintln!("{}", report.display_table());
    eprintln!("metrics (json):");
    eprintln!("{}", serde_json::to_string_pretty(&metrics.to_json())?);
    Ok(())
}

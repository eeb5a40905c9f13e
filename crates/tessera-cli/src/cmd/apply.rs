//! `tessera apply`: run a batch through a workspace, then optionally save
//! and export before exiting.

use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use serde::Serialize;
use tessera_core::RefreshMode;
use tessera_core::error::ErrorCode;
use tessera_core::persist::ExportOptions;
use tracing::info;

use crate::output::{CliError, OutputMode, pretty_kv, render, render_error};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Project file (JSON). Saves are written back here.
    #[arg(long, value_name = "PATH")]
    pub project: PathBuf,

    /// JSON array of commands forming one batch.
    #[arg(long, value_name = "PATH")]
    pub commands: PathBuf,

    /// Save the project through the persistence worker before exiting.
    #[arg(long)]
    pub save: bool,

    /// Export the project before exiting.
    #[arg(long)]
    pub export: bool,

    /// Export directory; defaults to the configured outputs.
    #[arg(long, value_name = "DIR", requires = "export")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ApplyOutput {
    commands: usize,
    mode: RefreshMode,
    structural: u64,
    live_value: u64,
    saved: bool,
    exported: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exported_diagnostics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_error: Option<String>,
}

pub fn run_apply(args: &ApplyArgs, output: OutputMode, verbose: bool) -> anyhow::Result<()> {
    let mut ws = super::open_workspace(&args.project, output)?;
    let commands = super::load_commands(&args.commands)?;
    let count = commands.len();

    let plan = match ws.execute_batch(commands) {
        Ok(plan) => plan,
        Err(err) => return Err(super::reject(output, &err)),
    };
    info!(commands = count, mode = %plan.mode, "batch applied");

    let mut saved = false;
    if args.save {
        let result = ws.save_now()?;
        if !result.ok {
            let message = result.error.unwrap_or_else(|| "save failed".to_string());
            render_error(output, &CliError::coded(ErrorCode::ProjectSaveFailed, &message))?;
            bail!("save failed: {message}");
        }
        saved = true;
    }

    let mut exported = false;
    let mut exported_diagnostics = Vec::new();
    if args.export {
        let options = args.out.as_ref().map(|dir| ExportOptions {
            generated_output_directory: Some(dir.clone()),
            write_manifest: true,
            ..ExportOptions::default()
        });
        let result = ws.export_now(options)?;
        if !result.ok {
            let message = result
                .first_error
                .unwrap_or_else(|| "export failed".to_string());
            render_error(output, &CliError::coded(ErrorCode::ExportFailed, &message))?;
            bail!("export failed: {message}");
        }
        exported = true;
        exported_diagnostics.extend(result.first_error);
    }

    let revision = ws.revision();
    let out = ApplyOutput {
        commands: count,
        mode: plan.mode,
        structural: revision.structural,
        live_value: revision.live_value,
        saved,
        exported,
        exported_diagnostics,
        compute_error: ws.last_compute_error().map(str::to_string),
    };
    render(output, &out, |o, w| {
        pretty_kv(w, "commands", o.commands.to_string())?;
        pretty_kv(w, "mode", o.mode.to_string())?;
        pretty_kv(w, "revision", format!("{}/{}", o.structural, o.live_value))?;
        pretty_kv(w, "saved", if o.saved { "yes" } else { "no" })?;
        pretty_kv(w, "exported", if o.exported { "yes" } else { "no" })?;
        for diagnostic in &o.exported_diagnostics {
            pretty_kv(w, "warning", diagnostic)?;
        }
        if let Some(err) = &o.compute_error {
            pretty_kv(w, "compute", err)?;
        }
        Ok(())
    })?;

    if verbose {
        super::print_metrics(ws.metrics())?;
    }
    ws.shutdown();
    Ok(())
}

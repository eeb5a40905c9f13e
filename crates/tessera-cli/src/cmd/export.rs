//! `tessera export`: run the export pipeline once.

use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use serde::Serialize;
use tessera_core::error::ErrorCode;
use tessera_core::persist::ExportOptions;

use crate::output::{CliError, OutputMode, pretty_kv, render, render_error};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Project file (JSON).
    #[arg(long, value_name = "PATH")]
    pub project: PathBuf,

    /// Directory receiving one JSON file per table and variant.
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Skip writing `manifest.json`.
    #[arg(long)]
    pub no_manifest: bool,
}

#[derive(Debug, Serialize)]
struct ExportOutput {
    directory: PathBuf,
    has_errors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_error: Option<String>,
    elapsed_ms: u64,
}

pub fn run_export(args: &ExportArgs, output: OutputMode, verbose: bool) -> anyhow::Result<()> {
    let mut ws = super::open_workspace(&args.project, output)?;
    let result = ws.export_now(Some(ExportOptions {
        generated_output_directory: Some(args.out.clone()),
        write_manifest: !args.no_manifest,
        ..ExportOptions::default()
    }))?;

    if !result.ok {
        let message = result
            .first_error
            .unwrap_or_else(|| "export failed".to_string());
        render_error(output, &CliError::coded(ErrorCode::ExportFailed, &message))?;
        bail!("export failed: {message}");
    }

    let out = ExportOutput {
        directory: args.out.clone(),
        has_errors: result.has_errors,
        first_error: result.first_error,
        elapsed_ms: u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
    };
    render(output, &out, |o, w| {
        pretty_kv(w, "directory", o.directory.display().to_string())?;
        pretty_kv(w, "elapsed", format!("{}ms", o.elapsed_ms))?;
        if let Some(err) = &o.first_error {
            pretty_kv(w, "warning", err)?;
        }
        Ok(())
    })?;

    if verbose {
        super::print_metrics(ws.metrics())?;
    }
    ws.shutdown();
    Ok(())
}

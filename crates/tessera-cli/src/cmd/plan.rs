//! `tessera plan`: show the refresh plan a batch would produce, without
//! touching the project file.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use serde::Serialize;
use tessera_core::command::apply_batch;
use tessera_core::metrics::Metrics;
use tessera_core::model::{DocumentId, TableId};
use tessera_core::{RefreshMode, plan_batch};
use tracing::debug;

use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Project file (JSON).
    #[arg(long, value_name = "PATH")]
    pub project: PathBuf,

    /// JSON array of commands forming one batch.
    #[arg(long, value_name = "PATH")]
    pub commands: PathBuf,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    commands: usize,
    mode: RefreshMode,
    dirty_tables: BTreeSet<TableId>,
    dirty_documents: BTreeSet<DocumentId>,
    refresh_dirty_table_indexes: bool,
}

pub fn run_plan(args: &PlanArgs, output: OutputMode, verbose: bool) -> anyhow::Result<()> {
    let mut project = super::load_project(&args.project, output)?;
    let commands = super::load_commands(&args.commands)?;

    if let Err(err) = apply_batch(&mut project, &commands) {
        return Err(super::reject(output, &err));
    }

    let mut metrics = Metrics::new();
    let started = Instant::now();
    let plan = plan_batch(&commands, &project);
    metrics.record("plan", started.elapsed());
    metrics.count_plan(plan.mode);
    debug!(mode = %plan.mode, tables = plan.dirty_tables.len(), "planned batch");

    let out = PlanOutput {
        commands: commands.len(),
        mode: plan.mode,
        dirty_tables: plan.dirty_tables,
        dirty_documents: plan.dirty_documents,
        refresh_dirty_table_indexes: plan.refresh_dirty_table_indexes,
    };
    render(output, &out, |o, w| {
        pretty_kv(w, "commands", o.commands.to_string())?;
        pretty_kv(w, "mode", o.mode.to_string())?;
        pretty_kv(w, "tables", join(&o.dirty_tables))?;
        pretty_kv(w, "documents", join(&o.dirty_documents))?;
        if o.refresh_dirty_table_indexes {
            writeln!(w, "row and variable indexes of dirty tables are rebuilt")?;
        }
        Ok(())
    })?;

    if verbose {
        super::print_metrics(&metrics)?;
    }
    Ok(())
}

fn join<T: std::fmt::Display>(ids: &BTreeSet<T>) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

//! `tessera undo-check`: execute a batch, undo it, and confirm the
//! project is back where it started.

use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use serde::Serialize;
use tessera_core::model::TableId;

use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct UndoCheckArgs {
    /// Project file (JSON). Never written.
    #[arg(long, value_name = "PATH")]
    pub project: PathBuf,

    /// JSON array of commands forming one batch.
    #[arg(long, value_name = "PATH")]
    pub commands: PathBuf,
}

#[derive(Debug, Serialize)]
struct UndoCheckOutput {
    restored: bool,
    /// Tables whose contents differ after the undo.
    differing_tables: Vec<TableId>,
    documents_match: bool,
    structural: u64,
}

pub fn run_undo_check(
    args: &UndoCheckArgs,
    output: OutputMode,
    verbose: bool,
) -> anyhow::Result<()> {
    let mut ws = super::open_workspace(&args.project, output)?;
    let commands = super::load_commands(&args.commands)?;
    let original = ws.project().clone();

    if let Err(err) = ws.execute_batch(commands) {
        return Err(super::reject(output, &err));
    }
    if ws.undo()?.is_none() {
        bail!("nothing to undo after executing the batch");
    }

    let current = ws.project();
    let differing_tables = original
        .tables
        .iter()
        .filter(|t| current.table(t.id) != Some(*t))
        .map(|t| t.id)
        .chain(
            current
                .tables
                .iter()
                .filter(|t| original.table(t.id).is_none())
                .map(|t| t.id),
        )
        .collect::<Vec<_>>();
    let out = UndoCheckOutput {
        restored: current == &original,
        documents_match: current.documents == original.documents,
        differing_tables,
        structural: ws.revision().structural,
    };

    render(output, &out, |o, w| {
        pretty_kv(w, "restored", if o.restored { "yes" } else { "no" })?;
        if !o.differing_tables.is_empty() {
            let ids = o
                .differing_tables
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            pretty_kv(w, "differs", ids.join(", "))?;
        }
        if !o.documents_match {
            pretty_kv(w, "documents", "differ")?;
        }
        Ok(())
    })?;

    if verbose {
        super::print_metrics(ws.metrics())?;
    }
    let restored = out.restored;
    ws.shutdown();
    if !restored {
        bail!("undo did not restore the original project");
    }
    Ok(())
}

//! tessera-core library.
//!
//! Keeps formula-driven tables and documents responsive while they are
//! edited: every edit is a reversible [`Command`](command::Command), a
//! [`RevisionClock`](clock::RevisionClock) stamps the project, the planner
//! picks the cheapest safe refresh, stamped caches serve derived reads, and
//! a background [`PersistenceActor`](persist::PersistenceActor) saves and
//! exports a mirror of the project. [`Workspace`](workspace::Workspace) ties
//! them together.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums with an [`ErrorCode`](error::ErrorCode)
//!   in the engine; `anyhow::Result` at the config and CLI edges.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).

pub mod cache;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod eval;
pub mod history;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod persist;
pub mod plan;
pub mod schedule;
pub mod workspace;

pub use clock::{Revision, RevisionClock};
pub use command::{ApplyError, Command};
pub use model::Project;
pub use plan::{RefreshMode, RefreshPlan, plan_batch};
pub use workspace::{Workspace, WorkspaceBuilder, WorkspaceError};

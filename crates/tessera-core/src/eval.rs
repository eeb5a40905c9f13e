//! Evaluation service boundary.
//!
//! The formula compiler/evaluator lives outside this crate. The workspace
//! drives it through [`EvaluationService`] after every planned batch. A
//! failed evaluation never rolls back the command that triggered it: the
//! caller records the error and keeps the last computed values visible.

use crate::error::ErrorCode;
use crate::model::{CellValue, Project, TableId};
use crate::plan::RefreshPlan;

/// Per-phase cost of one evaluation pass, in evaluator-defined ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct EvalMetrics {
    pub compile_ticks: u64,
    pub plan_ticks: u64,
    pub derived_ticks: u64,
    pub evaluate_ticks: u64,
    /// `false` when the evaluator fell back to a full pass.
    pub used_incremental_path: bool,
}

impl EvalMetrics {
    #[must_use]
    pub const fn total_ticks(&self) -> u64 {
        self.compile_ticks
            .saturating_add(self.plan_ticks)
            .saturating_add(self.derived_ticks)
            .saturating_add(self.evaluate_ticks)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("formula in {table} failed to compile: {message}")]
    Compile { table: TableId, message: String },

    #[error("evaluation failed: {0}")]
    Runtime(String),

    #[error("expression evaluation is not supported by this evaluator")]
    Unsupported,
}

impl EvalError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::EvaluationFailed
    }
}

/// The formula engine, as seen by the workspace.
pub trait EvaluationService: Send {
    /// Recompute derived values of `project` as `plan` requires.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] if compilation or evaluation fails. Values
    /// written before the failure may remain in `project`.
    fn evaluate(
        &mut self,
        project: &mut Project,
        plan: &RefreshPlan,
    ) -> Result<EvalMetrics, EvalError>;

    /// Evaluate a standalone expression in the context of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Unsupported`] unless the evaluator overrides it.
    fn evaluate_expression(
        &mut self,
        project: &Project,
        table: TableId,
        expression: &str,
    ) -> Result<CellValue, EvalError> {
        let _ = (project, table, expression);
        Err(EvalError::Unsupported)
    }
}

/// Evaluator for projects without a formula engine attached. Every plan
/// succeeds without touching the project.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvaluator;

impl EvaluationService for NullEvaluator {
    fn evaluate(
        &mut self,
        _project: &mut Project,
        plan: &RefreshPlan,
    ) -> Result<EvalMetrics, EvalError> {
        Ok(EvalMetrics {
            used_incremental_path: !matches!(plan.mode, crate::plan::RefreshMode::Full),
            ..EvalMetrics::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_evaluator_reports_path() {
        let mut project = Project::new();
        let mut eval = NullEvaluator;
        let metrics = eval
            .evaluate(&mut project, &RefreshPlan::incremental([TableId(1)], false))
            .expect("evaluate");
        assert!(metrics.used_incremental_path);
        let metrics = eval
            .evaluate(&mut project, &RefreshPlan::full())
            .expect("evaluate");
        assert!(!metrics.used_incremental_path);
    }

    #[test]
    fn expressions_unsupported_by_default() {
        let project = Project::new();
        let err = NullEvaluator
            .evaluate_expression(&project, TableId(1), "1 + 1")
            .expect_err("unsupported");
        assert_eq!(err, EvalError::Unsupported);
        assert_eq!(err.code(), ErrorCode::EvaluationFailed);
    }

    #[test]
    fn total_ticks_saturates() {
        let m = EvalMetrics {
            compile_ticks: u64::MAX,
            evaluate_ticks: 5,
            ..EvalMetrics::default()
        };
        assert_eq!(m.total_ticks(), u64::MAX);
    }
}

use proptest::prelude::*;
use tessera_core::clock::RevisionClock;
use tessera_core::command::apply_batch;
use tessera_core::history::History;
use tessera_core::model::Project;
use tessera_core::{Command, RefreshMode, RefreshPlan, plan_batch};

use generators::*;

fn arb_mode() -> impl Strategy<Value = RefreshMode> {
    prop::sample::select(vec![
        RefreshMode::None,
        RefreshMode::Incremental,
        RefreshMode::StructuralIncremental,
        RefreshMode::Full,
    ])
}

/// Build a batch from `ops` by applying each command to a scratch copy, so
/// later commands see the effects of earlier ones.
fn build_batch(start: &Project, ops: &[Op]) -> (Vec<Command>, Project) {
    let mut scratch = start.clone();
    let mut next_row = 100;
    let mut batch = Vec::new();
    for op in ops {
        if let Some(cmd) = command_for(&scratch, op, &mut next_row)
            && cmd.apply(&mut scratch).is_ok()
        {
            batch.push(cmd);
        }
    }
    (batch, scratch)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn promotion_never_lowers(modes in prop::collection::vec(arb_mode(), 0..16)) {
        let mut plan = RefreshPlan::none();
        for mode in &modes {
            let before = plan.mode;
            plan.promote(*mode);
            prop_assert!(plan.mode >= before);
            prop_assert!(plan.mode >= *mode);
        }
        let max = modes.iter().copied().max().unwrap_or(RefreshMode::None);
        prop_assert_eq!(plan.mode, max);
    }

    #[test]
    fn batch_plan_is_max_of_each_command(ops in arb_ops(12)) {
        let (batch, after) = build_batch(&base_project(), &ops);
        let combined = plan_batch(&batch, &after);
        let max = batch
            .iter()
            .map(|cmd| plan_batch(std::slice::from_ref(cmd), &after).mode)
            .max()
            .unwrap_or(RefreshMode::None);
        prop_assert_eq!(combined.mode, max);
        for cmd in &batch {
            let single = plan_batch(std::slice::from_ref(cmd), &after);
            prop_assert!(single.dirty_tables.is_subset(&combined.dirty_tables));
        }
    }

    #[test]
    fn inverse_of_inverse_is_identity(ops in arb_ops(8)) {
        let (batch, _) = build_batch(&base_project(), &ops);
        for cmd in batch {
            prop_assert_eq!(cmd.inverse().inverse(), cmd);
        }
    }

    #[test]
    fn undo_restores_each_step(ops in arb_ops(16)) {
        let mut project = base_project();
        let mut history = History::new();
        let mut snapshots = vec![project.clone()];
        let mut next_row = 100;
        for op in &ops {
            let Some(cmd) = command_for(&project, op, &mut next_row) else { continue };
            if history.execute(&mut project, vec![cmd]).is_ok() {
                snapshots.push(project.clone());
            }
        }
        prop_assert_eq!(history.position(), snapshots.len() - 1);

        while let Some(expected) = snapshots.pop() {
            prop_assert_eq!(&project, &expected);
            if history.undo(&mut project).expect("undo").is_none() {
                break;
            }
            prop_assert_eq!(history.position(), snapshots.len() - 1);
        }
        prop_assert_eq!(project, base_project());
    }

    #[test]
    fn mirror_replay_matches_primary(ops in arb_ops(16), undos in 0usize..4) {
        let mut primary = base_project();
        let mut mirror = primary.deep_copy();
        let (mut p_hist, mut m_hist) = (History::new(), History::new());
        let mut next_row = 100;
        for op in &ops {
            let Some(cmd) = command_for(&primary, op, &mut next_row) else { continue };
            if p_hist.execute(&mut primary, vec![cmd.clone()]).is_ok() {
                m_hist.execute(&mut mirror, vec![cmd]).expect("mirror replay");
            }
        }
        for _ in 0..undos {
            let p = p_hist.undo(&mut primary).expect("undo primary");
            let m = m_hist.undo(&mut mirror).expect("undo mirror");
            prop_assert_eq!(p, m);
        }
        prop_assert_eq!(primary, mirror);
    }

    #[test]
    fn rejected_batch_leaves_project_untouched(ops in arb_ops(8)) {
        let start = base_project();
        let (mut batch, _) = build_batch(&start, &ops);
        batch.push(Command::MoveRow {
            table: PARTS,
            from: 0,
            to: 10_000,
        });
        let mut project = start.clone();
        prop_assert!(apply_batch(&mut project, &batch).is_err());
        prop_assert_eq!(project, start);
    }

    #[test]
    fn clock_counts_commits(commits in 0u64..64, previews in 0u64..64) {
        let mut clock = RevisionClock::new();
        for _ in 0..previews {
            let _ = clock.bump_live_value();
        }
        for _ in 0..commits {
            let _ = clock.bump_structural();
        }
        prop_assert_eq!(clock.current().structural, 1 + commits);
        prop_assert_eq!(clock.current().live_value, 1 + commits + previews);
    }
}

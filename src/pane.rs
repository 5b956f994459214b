//! Pane builder: turns the matched instances and a grid shape into a tmux
//! session with one `bosh ssh` pane per instance, then synchronizes input.

use std::fmt;

use crate::error::{CommandError, Error};
use crate::tmux::{parse_pane_id, CommandRunner, Tmux};
use crate::types::{Instance, Layout, LayoutKind};

/// One planned tmux operation. Split targets are pane ordinals, i.e. the
/// creation index of the pane being split. `percent` is the share of the
/// target the new pane takes; `None` leaves tmux's even halving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneStep {
    NewSession { instance: usize },
    Split { kind: LayoutKind, target: usize, instance: usize, percent: Option<u32> },
    EvenVertical,
    Synchronize,
}

impl fmt::Display for PaneStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaneStep::NewSession { instance } => write!(f, "new-session (pane {})", instance),
            PaneStep::Split { kind, target, instance, percent } => {
                let dir = match kind { LayoutKind::Vertical => "vertical", LayoutKind::Horizontal => "horizontal" };
                write!(f, "{} split of pane {} (pane {})", dir, target, instance)?;
                match percent {
                    Some(p) => write!(f, " at {}%", p),
                    None => Ok(()),
                }
            }
            PaneStep::EvenVertical => write!(f, "select-layout even-vertical"),
            PaneStep::Synchronize => write!(f, "synchronize-panes"),
        }
    }
}

/// Plan the tmux steps for `count` panes laid out as `layout`.
///
/// Rows are created first by splitting the newest pane downward; then each
/// row is filled left to right by splitting that row's newest pane. Pane
/// `i` always runs instance `i`. `count` must be in `1..=layout.capacity()`.
///
/// A row that gets `k` more columns splits its tail so the new pane keeps
/// `k/(k+1)` of the width, which leaves every column of the row equal.
pub fn plan_panes(count: usize, layout: Layout) -> Vec<PaneStep> {
    let mut steps = Vec::with_capacity(count + 2);
    if count == 0 { return steps; }

    steps.push(PaneStep::NewSession { instance: 0 });
    let mut created = 1;

    // Newest pane of each row; starts as the row's leftmost pane.
    let mut row_tail: Vec<usize> = vec![0];
    for _ in 1..layout.rows {
        if created >= count { break; }
        let target = created - 1;
        steps.push(PaneStep::Split { kind: LayoutKind::Vertical, target, instance: created, percent: None });
        row_tail.push(created);
        created += 1;
    }

    steps.push(PaneStep::EvenVertical);

    let extra_columns = layout.columns.saturating_sub(1);
    for tail in row_tail.iter_mut() {
        let mut left = extra_columns.min(count - created);
        while left > 0 {
            steps.push(PaneStep::Split {
                kind: LayoutKind::Horizontal,
                target: *tail,
                instance: created,
                percent: Some(split_percent(left)),
            });
            *tail = created;
            created += 1;
            left -= 1;
        }
    }

    steps.push(PaneStep::Synchronize);
    steps
}

/// Share of a pane, in percent, the new pane takes when `remaining` more
/// columns (this one included) still have to fit to its right.
fn split_percent(remaining: usize) -> u32 {
    let k = remaining as u32;
    100 * k / (k + 1)
}

/// `bosh -d <deployment> ssh <group/id>`, quoted for the shell tmux runs it in.
pub fn ssh_command(bosh_bin: &str, deployment: &str, instance: &Instance) -> String {
    let slug = instance.slug();
    shell_words::join([bosh_bin, "-d", deployment, "ssh", slug.as_str()])
}

/// Executes a pane plan against tmux.
pub struct PaneBuilder<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    tmux: &'a Tmux,
    bosh_bin: &'a str,
    deployment: &'a str,
}

/// Panes created by a successful build, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltSession {
    pub session: String,
    pub pane_ids: Vec<String>,
}

/// A failed build, with whether the tmux session already existed.
#[derive(Debug)]
pub struct BuildFailure {
    pub error: Error,
    pub session_created: bool,
}

impl<'a, R: CommandRunner + ?Sized> PaneBuilder<'a, R> {
    pub fn new(runner: &'a R, tmux: &'a Tmux, bosh_bin: &'a str, deployment: &'a str) -> Self {
        PaneBuilder { runner, tmux, bosh_bin, deployment }
    }

    /// Create one pane per instance in `layout`. Stops at the first failing step.
    pub fn build(&self, instances: &[Instance], layout: Layout) -> Result<BuiltSession, BuildFailure> {
        let steps = plan_panes(instances.len(), layout);
        let mut pane_ids: Vec<String> = Vec::with_capacity(instances.len());

        for step in &steps {
            let inv = match step {
                PaneStep::NewSession { instance } => {
                    self.tmux.new_session(&ssh_command(self.bosh_bin, self.deployment, &instances[*instance]))
                }
                PaneStep::Split { kind, target, instance, percent } => self.tmux.split_window(
                    *kind,
                    &pane_ids[*target],
                    *percent,
                    &ssh_command(self.bosh_bin, self.deployment, &instances[*instance]),
                ),
                PaneStep::EvenVertical => self.tmux.select_layout("even-vertical"),
                PaneStep::Synchronize => self.tmux.synchronize_panes(),
            };
            log::debug!("pane step: {}", step);

            let fail = |source: CommandError, created: bool| BuildFailure {
                error: Error::PaneBuild { step: step.to_string(), source },
                session_created: created,
            };
            let output = self.runner.run(&inv).map_err(|e| fail(e, !pane_ids.is_empty()))?;

            if matches!(step, PaneStep::NewSession { .. } | PaneStep::Split { .. }) {
                let id = parse_pane_id(&output.stdout).map_err(|_| {
                    fail(CommandError::UnexpectedOutput {
                        command: inv.command_line(),
                        output: output.stdout.trim().to_string(),
                    }, true)
                })?;
                log::info!("pane {} -> {}", id, instances[pane_ids.len()]);
                pane_ids.push(id);
            }
        }

        Ok(BuiltSession { session: self.tmux.session().to_string(), pane_ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::layout::select_layout;
    use crate::tmux::{CommandOutput, Invocation};

    /// Records invocations and answers pane-creating commands with `%n`.
    struct FakeTmux {
        calls: RefCell<Vec<Invocation>>,
        fail_at: Option<usize>,
        garbage_at: Option<usize>,
    }

    impl FakeTmux {
        fn new() -> Self { FakeTmux { calls: RefCell::new(Vec::new()), fail_at: None, garbage_at: None } }
        fn failing_at(n: usize) -> Self { FakeTmux { fail_at: Some(n), ..FakeTmux::new() } }
        fn garbling_at(n: usize) -> Self { FakeTmux { garbage_at: Some(n), ..FakeTmux::new() } }
        fn horizontal_percents(&self) -> Vec<String> {
            self.calls.borrow().iter()
                .filter(|c| c.args[0] == "split-window" && c.args[1] == "-h")
                .map(|c| c.args[5].clone())
                .collect()
        }
        fn subcommands(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|c| c.args[0].clone()).collect()
        }
    }

    impl CommandRunner for FakeTmux {
        fn run(&self, inv: &Invocation) -> Result<CommandOutput, CommandError> {
            let n = self.calls.borrow().len();
            self.calls.borrow_mut().push(inv.clone());
            if self.fail_at == Some(n) {
                return Err(CommandError::NonZeroExit { command: inv.command_line(), status: "exit status: 1".into(), stderr: "no space for new pane".into() });
            }
            let creates = self.calls.borrow().iter().filter(|c| c.args[0] == "new-session" || c.args[0] == "split-window").count();
            let mut out = CommandOutput::default();
            if self.garbage_at == Some(n) {
                out.stdout = "bosh-ssh:0.1\n".into();
                return Ok(out);
            }
            if inv.args[0] == "new-session" || inv.args[0] == "split-window" {
                out.stdout = format!("%{}\n", creates - 1);
            }
            Ok(out)
        }
    }

    fn instances(n: usize) -> Vec<Instance> {
        (0..n).map(|i| Instance::new("web", i.to_string())).collect()
    }

    fn pane_instances(steps: &[PaneStep]) -> Vec<usize> {
        steps.iter().filter_map(|s| match s {
            PaneStep::NewSession { instance } | PaneStep::Split { instance, .. } => Some(*instance),
            _ => None,
        }).collect()
    }

    #[test]
    fn test_plan_three_panes() {
        let steps = plan_panes(3, select_layout(3).unwrap());
        assert_eq!(steps, vec![
            PaneStep::NewSession { instance: 0 },
            PaneStep::Split { kind: LayoutKind::Vertical, target: 0, instance: 1, percent: None },
            PaneStep::EvenVertical,
            PaneStep::Split { kind: LayoutKind::Horizontal, target: 0, instance: 2, percent: Some(50) },
            PaneStep::Synchronize,
        ]);
    }

    #[test]
    fn test_plan_single_pane() {
        let steps = plan_panes(1, select_layout(1).unwrap());
        assert_eq!(steps, vec![PaneStep::NewSession { instance: 0 }, PaneStep::EvenVertical, PaneStep::Synchronize]);
    }

    #[test]
    fn test_plan_fills_rows_left_to_right() {
        // 5 panes in 2x3: rows 0 and 1, row 0 gets two more, row 1 one more
        let steps = plan_panes(5, select_layout(5).unwrap());
        let horizontal: Vec<(usize, usize)> = steps.iter().filter_map(|s| match s {
            PaneStep::Split { kind: LayoutKind::Horizontal, target, instance, .. } => Some((*target, *instance)),
            _ => None,
        }).collect();
        assert_eq!(horizontal, vec![(0, 2), (2, 3), (1, 4)]);
    }

    #[test]
    fn test_plan_pane_count_and_order_for_all_counts() {
        for n in 1..=30 {
            let steps = plan_panes(n, select_layout(n).unwrap());
            assert_eq!(pane_instances(&steps), (0..n).collect::<Vec<_>>(), "count {n}");
            // every split targets an already created pane
            for s in &steps {
                if let PaneStep::Split { target, instance, .. } = s {
                    assert!(target < instance);
                }
            }
        }
    }

    #[test]
    fn test_synchronize_once_and_last() {
        for n in 1..=12 {
            let steps = plan_panes(n, select_layout(n).unwrap());
            let syncs = steps.iter().filter(|s| **s == PaneStep::Synchronize).count();
            assert_eq!(syncs, 1);
            assert_eq!(steps.last(), Some(&PaneStep::Synchronize));
        }
    }

    #[test]
    fn test_rows_never_exceed_layout() {
        for n in 1..=20 {
            let layout = select_layout(n).unwrap();
            let steps = plan_panes(n, layout);
            let vertical = steps.iter().filter(|s| matches!(s, PaneStep::Split { kind: LayoutKind::Vertical, .. })).count();
            assert!(vertical < layout.rows);
        }
    }

    #[test]
    fn test_ssh_command_quoting() {
        let inst = Instance::new("web", "6f1c-aa");
        assert_eq!(ssh_command("bosh", "cf", &inst), "bosh -d cf ssh web/6f1c-aa");
        assert_eq!(ssh_command("bosh", "my dep", &inst), "bosh -d 'my dep' ssh web/6f1c-aa");
    }

    #[test]
    fn test_build_issues_commands_in_order() {
        let fake = FakeTmux::new();
        let tmux = Tmux::new("tmux", "bosh-ssh");
        let insts = instances(3);
        let built = PaneBuilder::new(&fake, &tmux, "bosh", "cf")
            .build(&insts, select_layout(3).unwrap())
            .unwrap();
        assert_eq!(built.pane_ids, vec!["%0", "%1", "%2"]);
        assert_eq!(fake.subcommands(), vec!["new-session", "split-window", "select-layout", "split-window", "set-window-option"]);

        let calls = fake.calls.borrow();
        assert_eq!(calls[0].args.last().unwrap(), "bosh -d cf ssh web/0");
        assert_eq!(calls[1].args[1..4], ["-v", "-t", "%0"]);
        assert_eq!(calls[1].args.last().unwrap(), "bosh -d cf ssh web/1");
        assert_eq!(calls[3].args[1..4], ["-h", "-t", "%0"]);
        assert_eq!(calls[3].args.last().unwrap(), "bosh -d cf ssh web/2");
    }

    #[test]
    fn test_build_targets_row_tail_by_id() {
        let fake = FakeTmux::new();
        let tmux = Tmux::new("tmux", "s");
        PaneBuilder::new(&fake, &tmux, "bosh", "cf").build(&instances(5), select_layout(5).unwrap()).unwrap();
        let targets: Vec<String> = fake.calls.borrow().iter()
            .filter(|c| c.args[0] == "split-window" && c.args[1] == "-h")
            .map(|c| c.args[3].clone())
            .collect();
        assert_eq!(targets, vec!["%0", "%2", "%1"]);
    }

    #[test]
    fn test_build_stops_at_first_failure() {
        let fake = FakeTmux::failing_at(1);
        let tmux = Tmux::new("tmux", "s");
        let err = PaneBuilder::new(&fake, &tmux, "bosh", "cf")
            .build(&instances(4), select_layout(4).unwrap())
            .unwrap_err();
        assert!(err.session_created);
        assert!(matches!(err.error, Error::PaneBuild { .. }));
        assert_eq!(fake.calls.borrow().len(), 2);
        assert!(!fake.subcommands().contains(&"set-window-option".to_string()));
    }

    #[test]
    fn test_build_failure_before_session_exists() {
        let fake = FakeTmux::failing_at(0);
        let tmux = Tmux::new("tmux", "s");
        let err = PaneBuilder::new(&fake, &tmux, "bosh", "cf")
            .build(&instances(2), select_layout(2).unwrap())
            .unwrap_err();
        assert!(!err.session_created);
    }

    fn horizontal_percents(steps: &[PaneStep]) -> Vec<Vec<u32>> {
        // grouped per row, keyed by the row's leftmost pane
        let mut rows: Vec<Vec<u32>> = Vec::new();
        let mut last_instance = None;
        for s in steps {
            if let PaneStep::Split { kind: LayoutKind::Horizontal, target, instance, percent } = s {
                if last_instance != Some(*target) { rows.push(Vec::new()); }
                if let (Some(row), Some(p)) = (rows.last_mut(), percent) { row.push(*p); }
                last_instance = Some(*instance);
            }
        }
        rows
    }

    #[test]
    fn test_split_percent_keeps_columns_equal() {
        assert_eq!(split_percent(1), 50);
        assert_eq!(split_percent(2), 66);
        assert_eq!(split_percent(3), 75);
    }

    #[test]
    fn test_plan_sizes_horizontal_splits() {
        // 2x3 full: both rows split 66% then 50%
        assert_eq!(horizontal_percents(&plan_panes(6, select_layout(6).unwrap())), vec![vec![66, 50], vec![66, 50]]);
        // 5 in 2x3: second row only gets one more column, so halves
        assert_eq!(horizontal_percents(&plan_panes(5, select_layout(5).unwrap())), vec![vec![66, 50], vec![50]]);
        // 16 in 4x4: every row thirds-quarters down to 50
        assert_eq!(horizontal_percents(&plan_panes(16, select_layout(16).unwrap())), vec![vec![75, 66, 50]; 4]);
    }

    #[test]
    fn test_vertical_splits_are_unsized() {
        for n in 1..=16 {
            for s in plan_panes(n, select_layout(n).unwrap()) {
                if let PaneStep::Split { kind: LayoutKind::Vertical, percent, .. } = s {
                    assert_eq!(percent, None);
                }
            }
        }
    }

    #[test]
    fn test_build_passes_split_size_to_tmux() {
        let fake = FakeTmux::new();
        let tmux = Tmux::new("tmux", "s");
        PaneBuilder::new(&fake, &tmux, "bosh", "cf").build(&instances(6), select_layout(6).unwrap()).unwrap();
        assert_eq!(fake.horizontal_percents(), vec!["66%", "50%", "66%", "50%"]);
        let calls = fake.calls.borrow();
        let h = calls.iter().find(|c| c.args[0] == "split-window" && c.args[1] == "-h").unwrap();
        assert_eq!(h.args[4], "-l");
    }

    #[test]
    fn test_build_rejects_output_without_pane_id() {
        let fake = FakeTmux::garbling_at(1);
        let tmux = Tmux::new("tmux", "s");
        let err = PaneBuilder::new(&fake, &tmux, "bosh", "cf")
            .build(&instances(3), select_layout(3).unwrap())
            .unwrap_err();
        assert!(err.session_created);
        match err.error {
            Error::PaneBuild { source: CommandError::UnexpectedOutput { output, .. }, .. } => {
                assert_eq!(output, "bosh-ssh:0.1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

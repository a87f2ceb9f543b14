//! Scheduling policy: which queued targets start building now.
//!
//! Pure functions over snapshots of supervisor state, so the policy is
//! unit-testable without a runtime. The rules, in order:
//!
//! 1. Never exceed `max_parallel` concurrent compiler invocations
//!    (post-processing runs in its own pool and does not count).
//! 2. Targets with an active browser session go first; ties break FIFO
//!    by enqueue time.
//! 3. At most one build per manifest group — the compiler locks
//!    per-project — unless capacity would otherwise sit idle.

use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::core::OutputPath;

/// A target in `QueuedForBuild`, as the planner sees it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub output: OutputPath,
    pub group: usize,
    pub queued_at: Instant,
    pub has_session: bool,
}

/// Choose the outputs to start now.
///
/// `running_groups` lists the group index of every in-flight compiler
/// invocation (one entry per invocation).
pub fn plan(
    mut candidates: Vec<Candidate>,
    running_groups: &[usize],
    max_parallel: usize,
) -> Vec<OutputPath> {
    let slots = max_parallel.saturating_sub(running_groups.len());
    if slots == 0 || candidates.is_empty() {
        return Vec::new();
    }

    candidates.sort_by(|a, b| {
        b.has_session
            .cmp(&a.has_session)
            .then(a.queued_at.cmp(&b.queued_at))
    });

    let mut busy: FxHashSet<usize> = running_groups.iter().copied().collect();
    let mut chosen: Vec<OutputPath> = Vec::new();
    let mut leftover: Vec<Candidate> = Vec::new();

    // First pass: spread across idle groups.
    for candidate in candidates {
        if chosen.len() == slots {
            break;
        }
        if busy.insert(candidate.group) {
            chosen.push(candidate.output);
        } else {
            leftover.push(candidate);
        }
    }

    // Second pass: idle capacity remains, allow same-group builds (the
    // compiler's project lock serializes them anyway).
    for candidate in leftover {
        if chosen.len() == slots {
            break;
        }
        chosen.push(candidate.output);
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AbsolutePath;
    use std::path::Path;
    use std::time::Duration;

    fn output(name: &str) -> OutputPath {
        AbsolutePath::from_path(Path::new(&format!("/build/{name}.js"))).unwrap()
    }

    fn candidate(name: &str, group: usize, age_ms: u64, has_session: bool) -> Candidate {
        Candidate {
            output: output(name),
            group,
            queued_at: Instant::now() - Duration::from_millis(age_ms),
            has_session,
        }
    }

    #[test]
    fn test_respects_parallelism_cap() {
        let candidates = vec![
            candidate("a", 0, 30, false),
            candidate("b", 1, 20, false),
            candidate("c", 2, 10, false),
        ];
        let chosen = plan(candidates, &[], 2);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn test_no_slots_when_saturated() {
        let candidates = vec![candidate("a", 0, 10, true)];
        assert!(plan(candidates, &[1, 2], 2).is_empty());
    }

    #[test]
    fn test_session_targets_first() {
        let candidates = vec![
            candidate("old-idle", 0, 100, false),
            candidate("fresh-watched", 1, 1, true),
        ];
        let chosen = plan(candidates, &[], 1);
        assert_eq!(chosen, [output("fresh-watched")]);
    }

    #[test]
    fn test_fifo_within_same_priority() {
        let candidates = vec![
            candidate("newer", 0, 10, false),
            candidate("older", 1, 50, false),
        ];
        let chosen = plan(candidates, &[], 1);
        assert_eq!(chosen, [output("older")]);
    }

    #[test]
    fn test_one_build_per_group_when_contended() {
        // Two queued in group 0, one in group 1, two slots: spread.
        let candidates = vec![
            candidate("a1", 0, 30, false),
            candidate("a2", 0, 20, false),
            candidate("b1", 1, 10, false),
        ];
        let chosen = plan(candidates, &[], 2);
        assert_eq!(chosen, [output("a1"), output("b1")]);
    }

    #[test]
    fn test_same_group_allowed_when_capacity_idle() {
        let candidates = vec![
            candidate("a1", 0, 30, false),
            candidate("a2", 0, 20, false),
        ];
        let chosen = plan(candidates, &[], 4);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn test_running_group_blocks_first_pass() {
        // Group 0 already building; its queued sibling yields to group 1
        // but still fills the remaining slot.
        let candidates = vec![
            candidate("a2", 0, 50, false),
            candidate("b1", 1, 10, false),
        ];
        let chosen = plan(candidates, &[0], 3);
        assert_eq!(chosen, [output("b1"), output("a2")]);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(plan(Vec::new(), &[], 4).is_empty());
    }
}

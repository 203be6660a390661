// tests/property_scheduler.rs

mod common;

use std::collections::{HashMap, VecDeque};

use proptest::prelude::*;
use rias::dag::{Scheduler, StageInfo};
use rias::types::{Status, WorkflowStatus};

/// A random DAG: stage `i` may only depend on stages with a lower index,
/// which rules out cycles by construction.
#[derive(Debug, Clone)]
struct Dag {
    deps: Vec<Vec<usize>>,
    fails: Vec<bool>,
    tolerant: Vec<bool>,
}

fn dag_strategy() -> impl Strategy<Value = Dag> {
    (1usize..10).prop_flat_map(|n| {
        let deps = (0..n)
            .map(|i| proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i.min(3)))
            .collect::<Vec<_>>();
        (
            deps,
            proptest::collection::vec(proptest::bool::weighted(0.25), n),
            proptest::collection::vec(proptest::bool::weighted(0.3), n),
        )
            .prop_map(|(deps, fails, tolerant)| Dag {
                deps,
                fails,
                tolerant,
            })
    })
}

fn name(i: usize) -> String {
    format!("s{i}")
}

fn infos(dag: &Dag) -> Vec<StageInfo> {
    dag.deps
        .iter()
        .enumerate()
        .map(|(i, deps)| {
            StageInfo::new(name(i), deps.iter().map(|d| name(*d)).collect())
                .continue_on_failure(dag.tolerant[i])
        })
        .collect()
}

/// Drive the scheduler to completion, finishing in-flight stages in FIFO
/// order. Returns the dispatch order.
fn drive(s: &mut Scheduler, dag: &Dag) -> Vec<String> {
    let index: HashMap<String, usize> = (0..dag.deps.len()).map(|i| (name(i), i)).collect();
    let mut started = Vec::new();
    let mut queue = VecDeque::new();

    let step = s.start_new_run();
    for st in step.newly_scheduled {
        started.push(st.name.clone());
        queue.push_back(st.name);
    }

    let mut guard = 0;
    while let Some(stage) = queue.pop_front() {
        guard += 1;
        assert!(guard <= dag.deps.len(), "more completions than stages");

        // Every dependency of a dispatched stage is terminal.
        for dep in s.dependencies_of(&stage) {
            let state = s.run_state_of(dep).expect("known stage");
            assert!(state.is_terminal(), "{stage} ran before {dep} finished");
        }

        let status = if dag.fails[index[&stage]] {
            Status::Failed
        } else {
            Status::Succeeded
        };
        let step = s.step_completion(&stage, status);
        for st in step.newly_scheduled {
            started.push(st.name.clone());
            queue.push_back(st.name);
        }
    }

    started
}

proptest! {
    #[test]
    fn random_dags_always_terminate(dag in dag_strategy(), budget in 1usize..4) {
        let mut s = Scheduler::new(infos(&dag), budget, false);
        let started = drive(&mut s, &dag);

        prop_assert!(s.is_idle());
        prop_assert!(s.rounds() <= dag.deps.len());
        prop_assert!(started.len() <= dag.deps.len());

        for i in 0..dag.deps.len() {
            let state = s.run_state_of(&name(i)).unwrap();
            prop_assert!(state.is_terminal(), "s{} left in {:?}", i, state);
        }

        // Nothing was started twice.
        let mut unique = started.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), started.len());
    }

    #[test]
    fn outcome_matches_stage_states(dag in dag_strategy()) {
        let mut s = Scheduler::new(infos(&dag), 2, false);
        drive(&mut s, &dag);

        let hard_failure = (0..dag.deps.len()).any(|i| {
            match s.run_state_of(&name(i)).unwrap() {
                Status::Failed => !dag.tolerant[i],
                Status::Skipped => true,
                _ => false,
            }
        });
        let expected = if hard_failure {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Succeeded
        };
        prop_assert_eq!(s.outcome(), Some(expected));
    }

    #[test]
    fn without_failures_everything_succeeds(n in 1usize..12, budget in 1usize..5) {
        let dag = Dag {
            deps: (0..n).map(|i| if i == 0 { vec![] } else { vec![i - 1] }).collect(),
            fails: vec![false; n],
            tolerant: vec![false; n],
        };
        let mut s = Scheduler::new(infos(&dag), budget, false);
        let started = drive(&mut s, &dag);

        prop_assert_eq!(started.len(), n);
        prop_assert_eq!(s.rounds(), n);
        prop_assert_eq!(s.outcome(), Some(WorkflowStatus::Succeeded));
    }
}

mod common;

use std::collections::HashSet;

use buildtree::config::BuildTreeConfig;
use buildtree::plan::{FinalizedExecutionPlan, NodeState};
use buildtree::tree::BuildState;
use buildtree_test_utils::builders::{BuildDefinitionBuilder, BuildTreeConfigBuilder, TaskDefinitionBuilder};
use buildtree_test_utils::recording_executor::RecordingNodeExecutor;
use proptest::prelude::*;

use common::tree_with;

// Task N may only depend on tasks 0..N-1, so every generated graph is acyclic.
fn dag_config_strategy(max_tasks: usize) -> impl Strategy<Value = (BuildTreeConfig, usize)> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        );
        let continue_strat = any::<bool>();

        (deps_strat, continue_strat).prop_map(move |(raw_deps, continue_on_failure)| {
            let mut root = BuildDefinitionBuilder::named("app");
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                let name = format!("task_{i}");
                let mut task = TaskDefinitionBuilder::new().cmd(&format!("echo {name}"));
                let valid: HashSet<usize> = potential_deps
                    .into_iter()
                    .filter(|_| i > 0)
                    .map(|dep| dep % i.max(1))
                    .collect();
                for dep in valid {
                    task = task.after(&format!("task_{dep}"));
                }
                root = root.requested(&name).task(":", &name, task);
            }
            let config = BuildTreeConfigBuilder::new(root)
                .continue_on_failure(continue_on_failure)
                .build();
            (config, num_tasks)
        })
    })
}

fn finalized_plan(config: BuildTreeConfig) -> FinalizedExecutionPlan {
    let executor = RecordingNodeExecutor::new();
    let tree = tree_with(config, &executor);
    let root = tree.root().unwrap();
    let lifecycle = root.lifecycle();
    let mut plan = lifecycle.new_execution_plan();
    lifecycle.schedule_requested_tasks(&mut plan).unwrap();
    lifecycle.finalize_work_graph(plan).unwrap()
}

/// Direct dependencies of every node, by node id.
fn dependencies(plan: &FinalizedExecutionPlan) -> Vec<Vec<usize>> {
    plan.planned_nodes()
        .iter()
        .map(|node| {
            node.node_dependencies
                .iter()
                .filter_map(|dep| plan.id_of(dep))
                .collect()
        })
        .collect()
}

proptest! {
    #[test]
    fn scheduler_terminates_and_respects_dependencies(
        (cfg, num_tasks) in dag_config_strategy(10),
        failing in proptest::collection::vec(0..10usize, 0..4),
        max_workers in 1usize..4,
        pick in any::<usize>(),
    ) {
        let mut plan = finalized_plan(cfg);
        prop_assert_eq!(plan.len(), num_tasks);
        let deps = dependencies(&plan);
        let failing: HashSet<String> = failing.iter().map(|i| format!(":task_{i}")).collect();

        let mut running: Vec<usize> = Vec::new();
        let mut started: HashSet<usize> = HashSet::new();
        let mut steps = 0;

        loop {
            for node in plan.select_ready(max_workers) {
                for &dep in &deps[node.id] {
                    prop_assert_eq!(plan.state_of(dep), Some(NodeState::Succeeded));
                }
                prop_assert!(started.insert(node.id), "node {} started twice", node.id);
                running.push(node.id);
            }
            prop_assert!(running.len() <= max_workers);
            if running.is_empty() {
                break;
            }

            steps += 1;
            prop_assert!(steps <= num_tasks, "more completions than nodes");
            let id = running.remove(pick % running.len());
            let name = plan.identity_of(id).map(|i| i.to_string()).unwrap_or_default();
            let transitions = plan.node_finished(id, !failing.contains(&name));
            prop_assert_eq!(transitions[0].id, id);
        }

        prop_assert!(plan.is_complete());
        for id in 0..plan.len() {
            let state = plan.state_of(id).unwrap();
            let blocked = deps[id]
                .iter()
                .any(|&dep| plan.state_of(dep) != Some(NodeState::Succeeded));
            match state {
                NodeState::Succeeded | NodeState::Failed => prop_assert!(!blocked),
                NodeState::Skipped => {
                    if plan.continue_on_failure() {
                        prop_assert!(blocked, "node {} skipped without a failed dependency", id);
                    } else {
                        prop_assert!(plan.has_failures());
                    }
                }
                other => prop_assert!(false, "node {} left in {:?}", id, other),
            }
        }
        if !plan.has_failures() {
            prop_assert_eq!(started.len(), num_tasks);
        }
    }
}

#[test]
fn failed_node_skips_only_its_dependents_when_continuing() {
    let root = BuildDefinitionBuilder::named("app")
        .requested("report")
        .task(":", "a", TaskDefinitionBuilder::new())
        .task(":", "b", TaskDefinitionBuilder::new())
        .task(":", "c", TaskDefinitionBuilder::new().after("a"))
        .task(":", "report", TaskDefinitionBuilder::new().after("c").after("b"));
    let config = BuildTreeConfigBuilder::new(root).continue_on_failure(true).build();
    let mut plan = finalized_plan(config);

    let ready = plan.select_ready(4);
    let names: HashSet<String> = ready.iter().map(|n| n.identity.to_string()).collect();
    assert_eq!(names, HashSet::from([":a".to_string(), ":b".to_string()]));

    let a = ready.iter().find(|n| n.identity.to_string() == ":a").unwrap().id;
    let b = ready.iter().find(|n| n.identity.to_string() == ":b").unwrap().id;
    let transitions = plan.node_finished(a, false);
    assert_eq!(transitions.len(), 3);
    assert!(transitions[1..].iter().all(|t| t.state == NodeState::Skipped));
    assert!(!plan.is_complete());

    plan.node_finished(b, true);
    assert!(plan.select_ready(4).is_empty());
    assert!(plan.is_complete());
    assert!(plan.has_failures());
}

#[test]
fn worker_limit_holds_back_ready_nodes() {
    let mut root = BuildDefinitionBuilder::named("app");
    for name in ["a", "b", "c"] {
        root = root.requested(name).task(":", name, TaskDefinitionBuilder::new());
    }
    let mut plan = finalized_plan(BuildTreeConfigBuilder::new(root).build());

    let first = plan.select_ready(2);
    assert_eq!(first.len(), 2);
    assert!(plan.select_ready(2).is_empty());
    plan.node_finished(first[0].id, true);
    assert_eq!(plan.select_ready(2).len(), 1);

    // Finishing a node that is not running changes nothing.
    assert!(plan.node_finished(first[0].id, false).is_empty());
    assert!(!plan.has_failures());
}

mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use buildtree::config::BuildDefinition;
use buildtree::errors::BuildError;
use buildtree::model::{BuildListener, BuildResult};
use buildtree::operations::{
    BuildOperationListener, CALCULATE_TASK_GRAPH, OperationDescriptor, OperationFinishEvent,
};
use buildtree::plan::DetailLevel;
use buildtree::result::ExecutionResult;
use buildtree::tree::{BuildState, Path};
use buildtree::workgraph::TaskState;
use buildtree_test_utils::with_timeout;
use buildtree_test_utils::builders::{BuildDefinitionBuilder, BuildTreeConfigBuilder, TaskDefinitionBuilder};
use buildtree_test_utils::recording_executor::RecordingNodeExecutor;
use serde_json::json;

use common::{app_with_lib, selectors, tree_with};

#[derive(Default)]
struct RecordingOperations {
    finished: Mutex<Vec<(OperationDescriptor, OperationFinishEvent)>>,
}

impl BuildOperationListener for RecordingOperations {
    fn finished(&self, operation: &OperationDescriptor, event: &OperationFinishEvent) {
        self.finished
            .lock()
            .unwrap()
            .push((operation.clone(), event.clone()));
    }
}

#[derive(Default)]
struct FinishedBuilds {
    results: Mutex<Vec<BuildResult>>,
}

impl BuildListener for FinishedBuilds {
    fn build_finished(&self, result: &BuildResult) -> anyhow::Result<()> {
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }
}

fn before(executor: &RecordingNodeExecutor, first: &str, second: &str) -> bool {
    match (executor.position(first), executor.position(second)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

#[test]
fn included_build_tasks_run_before_their_consumers() {
    let executor = RecordingNodeExecutor::new();
    let tree = tree_with(app_with_lib().build(), &executor);

    let result = tree.schedule_and_run(&[]);
    assert!(result.is_success(), "{:?}", result.failures());
    assert!(tree.finish(result).is_success());

    let executed = executor.executed();
    assert_eq!(executed.len(), 4, "{executed:?}");
    assert!(before(&executor, ":lib:classes", ":lib:jar"));
    assert!(before(&executor, ":lib:jar", ":compile"));
    assert!(before(&executor, ":compile", ":build"));
    assert!(executor.position(":lib:docs").is_none());
}

#[test]
fn explicit_selectors_replace_requested_tasks() {
    let executor = RecordingNodeExecutor::new();
    let tree = tree_with(app_with_lib().build(), &executor);

    let result = tree.schedule_and_run(&selectors(&["compile"]));
    assert!(tree.finish(result).is_success());
    assert_eq!(executor.executed(), vec![":lib:classes", ":lib:jar", ":compile"]);
}

#[test]
fn failure_in_included_build_stops_its_consumers() {
    let executor = RecordingNodeExecutor::new();
    executor.fail(":lib:classes");
    let tree = tree_with(app_with_lib().build(), &executor);

    let result = tree.schedule_and_run(&[]);
    assert!(!result.is_success());
    assert_eq!(executor.executed(), vec![":lib:classes"]);

    let outcome = tree.finish(result);
    let failure = outcome.get_failure().expect("tree failed");
    assert!(
        failure.to_string().contains("Execution failed for :lib:classes."),
        "{failure}"
    );
}

#[test]
fn excluded_task_of_included_build_counts_as_done() {
    let executor = RecordingNodeExecutor::new();
    let app = BuildDefinitionBuilder::named("app")
        .requested("build")
        .task(":", "compile", TaskDefinitionBuilder::new().included("lib", ":jar"))
        .task(":", "build", TaskDefinitionBuilder::new().after("compile"));
    let lib = BuildDefinitionBuilder::new()
        .excluded("classes")
        .task(":", "classes", TaskDefinitionBuilder::new())
        .task(":", "jar", TaskDefinitionBuilder::new().after("classes"));
    let config = BuildTreeConfigBuilder::new(app).include("lib", lib).build();
    let tree = tree_with(config, &executor);

    let result = tree.schedule_and_run(&[]);
    assert!(tree.finish(result).is_success());
    assert_eq!(executor.executed(), vec![":lib:jar", ":compile", ":build"]);
}

#[test]
fn continue_on_failure_runs_independent_tasks() {
    let root = || {
        BuildDefinitionBuilder::named("app")
            .requested("a")
            .requested("b")
            .requested("c")
            .task(":", "a", TaskDefinitionBuilder::new())
            .task(":", "b", TaskDefinitionBuilder::new().after("a").after("c"))
            .task(":", "c", TaskDefinitionBuilder::new())
    };

    let executor = RecordingNodeExecutor::new();
    executor.fail(":a");
    let config = BuildTreeConfigBuilder::new(root())
        .max_workers(1)
        .continue_on_failure(true)
        .build();
    let tree = tree_with(config, &executor);
    let result = tree.schedule_and_run(&[]);
    assert_eq!(result.failures().len(), 1);
    assert!(executor.position(":a").is_some());
    assert!(executor.position(":c").is_some());
    assert!(executor.position(":b").is_none());
    assert!(!tree.finish(result).is_success());
}

#[test]
fn dry_run_reports_planned_nodes_per_build() {
    let executor = RecordingNodeExecutor::new();
    let app = BuildDefinitionBuilder::named("app")
        .requested("build")
        .task(
            ":",
            "compile",
            TaskDefinitionBuilder::new().transform("unzip").transform("merge"),
        )
        .task(":", "build", TaskDefinitionBuilder::new().after("compile").included("lib", ":jar"));
    let lib = BuildDefinitionBuilder::new().task(":", "jar", TaskDefinitionBuilder::new());
    let config = BuildTreeConfigBuilder::new(app).include("lib", lib).build();
    let tree = tree_with(config, &executor);

    let planned = tree.planned_graph(&[], DetailLevel::Level1Tasks).unwrap();
    assert!(executor.executed().is_empty());
    assert_eq!(planned.len(), 2);

    let root = &planned[0];
    assert!(root.build.build_path().is_root());
    let mut names: Vec<String> = root.nodes.iter().map(|n| n.node_identity.to_string()).collect();
    names.sort();
    assert_eq!(names, vec![":build", ":compile", ":lib:jar"]);
    let build = root
        .nodes
        .iter()
        .find(|n| n.node_identity.to_string() == ":build")
        .unwrap();
    let mut deps: Vec<String> = build.node_dependencies.iter().map(|d| d.to_string()).collect();
    deps.sort();
    assert_eq!(deps, vec![":compile", ":lib:jar"]);
    let compile = root
        .nodes
        .iter()
        .find(|n| n.node_identity.to_string() == ":compile")
        .unwrap();
    assert!(compile.node_dependencies.is_empty());

    let lib = &planned[1];
    assert_eq!(lib.build.build_path().to_string(), ":lib");
    assert_eq!(lib.nodes.len(), 1);

    let steps = tree.planned_graph(&[], DetailLevel::Level2TransformSteps).unwrap();
    let names: Vec<String> = steps[0].nodes.iter().map(|n| n.node_identity.to_string()).collect();
    assert_eq!(names.len(), 5);
    assert!(names.contains(&"unzip#0 for :compile".to_string()));
    assert!(names.contains(&"merge#1 for :compile".to_string()));
    assert!(executor.executed().is_empty());
    assert!(tree.finish(ExecutionResult::success()).is_success());
}

#[test]
fn calculate_task_graph_operation_reports_each_build() {
    let executor = RecordingNodeExecutor::new();
    let tree = tree_with(app_with_lib().build(), &executor);
    let operations = Arc::new(RecordingOperations::default());
    tree.add_operation_listener(operations.clone());

    let result = tree.schedule_and_run(&[]);
    assert!(tree.finish(result).is_success());

    let finished = operations.finished.lock().unwrap();
    let graphs: Vec<_> = finished
        .iter()
        .filter(|(op, _)| op.name == CALCULATE_TASK_GRAPH)
        .collect();
    assert_eq!(graphs.len(), 2);

    let (root_op, root_event) = graphs
        .iter()
        .find(|(op, _)| op.details == json!({ "buildPath": ":" }))
        .expect("root build operation");
    assert!(root_op.id > 0);
    assert!(root_event.failure.is_none());
    let payload = root_event.result.as_ref().expect("operation result");
    assert_eq!(payload["requestedTaskPaths"], json!([":build"]));
    assert_eq!(payload["excludedTaskPaths"], json!([]));
    assert_eq!(payload["executionPlan"][0]["nodeIdentity"]["nodeType"], "TASK");
    assert!(payload["taskPlan"].as_array().is_some_and(|plan| plan.len() == 3));

    assert!(graphs
        .iter()
        .any(|(op, _)| op.details == json!({ "buildPath": ":lib" })));
}

#[test]
fn finishing_the_tree_notifies_and_stops_every_build() {
    let executor = RecordingNodeExecutor::new();
    executor.fail(":build");
    let tree = tree_with(app_with_lib().build(), &executor);
    let listener = Arc::new(FinishedBuilds::default());
    tree.add_listener(listener.clone());

    let result = tree.schedule_and_run(&[]);
    let failure = result.get_failure().expect("build failed");
    let outcome = tree.finish(result);
    assert!(outcome.failures().iter().any(|f| f.same_as(&failure)));

    let results = listener.results.lock().unwrap();
    assert_eq!(results.len(), 2);
    let root = results
        .iter()
        .find(|r| r.build.build_path().is_root())
        .expect("root result");
    assert_eq!(root.action, "Build");
    assert!(root.failure.as_ref().is_some_and(|f| f.same_as(&failure)));
    let lib = results
        .iter()
        .find(|r| !r.build.build_path().is_root())
        .expect("lib result");
    assert!(lib.is_success());

    assert!(tree.registry().builds().is_empty());
}

#[test]
fn unknown_selector_fails_before_anything_runs() {
    let executor = RecordingNodeExecutor::new();
    let tree = tree_with(app_with_lib().build(), &executor);

    let result = tree.schedule_and_run(&selectors(&["deploy"]));
    let failure = result.get_failure().expect("unknown task");
    assert!(failure.to_string().contains("'deploy'"), "{failure}");
    assert!(executor.executed().is_empty());

    assert_eq!(tree.root().unwrap().lifecycle().display_name(), "Build");
    assert!(!tree.finish(result).is_success());
}

#[test]
fn consumers_wait_while_included_task_is_running() {
    let executor = RecordingNodeExecutor::new();
    let gate = executor.block(":lib:jar");
    let tree = tree_with(app_with_lib().build(), &executor);
    let lib = tree.registry().included_build("lib").unwrap();
    let jar = lib.work_graph().locate_task(&Path::parse(":jar").unwrap());

    let observer = {
        let executor = Arc::clone(&executor);
        let jar = Arc::clone(&jar);
        let mut states = jar.subscribe();
        thread::spawn(move || {
            let watched = Arc::clone(&executor);
            let settled = with_timeout(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let started = async {
                        states.wait_for(|state| *state == TaskState::Waiting).await.ok()?;
                        while watched.position(":lib:classes").is_none() {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Some(())
                    };
                    tokio::time::timeout(Duration::from_secs(5), started)
                        .await
                        .ok()
                        .flatten()
                        .is_some()
                })
            });
            let mid_run = (settled, jar.task_state(), executor.executed());
            gate.notify_one();
            mid_run
        })
    };

    let result = tree.schedule_and_run(&[]);
    let (settled, state_mid_run, executed_mid_run) = observer.join().unwrap();
    assert!(settled, "included build never started");
    assert_eq!(state_mid_run, TaskState::Waiting);
    assert_eq!(executed_mid_run, vec![":lib:classes"]);

    assert!(result.is_success(), "{:?}", result.failures());
    assert_eq!(jar.task_state(), TaskState::Success);
    assert!(before(&executor, ":lib:classes", ":lib:jar"));
    assert!(before(&executor, ":lib:jar", ":compile"));
    assert!(before(&executor, ":compile", ":build"));
    assert!(tree.finish(result).is_success());
}

#[test]
fn panicking_included_task_fails_its_consumers() {
    let executor = RecordingNodeExecutor::new();
    executor.panic_on(":lib:classes");
    let tree = tree_with(app_with_lib().build(), &executor);
    let lib = tree.registry().included_build("lib").unwrap();
    let jar = lib.work_graph().locate_task(&Path::parse(":jar").unwrap());

    let result = tree.schedule_and_run(&[]);
    let failure = result.get_failure().expect("panic reported as a failure");
    assert!(
        failure.to_string().contains("Execution of :lib:classes panicked"),
        "{failure}"
    );
    assert_eq!(executor.executed(), vec![":lib:classes"]);
    assert_eq!(jar.task_state(), TaskState::Failed);
    assert!(!tree.finish(result).is_success());
}

#[test]
fn builds_are_visited_in_path_order() {
    let executor = RecordingNodeExecutor::new();
    let tree = tree_with(app_with_lib().build(), &executor);
    let registry = tree.registry();
    for name in ["zeta", "alpha", "mid"] {
        registry.add_included_build(BuildDefinition::new(name)).unwrap();
    }

    let expected = vec![":", ":alpha", ":lib", ":mid", ":zeta"];
    let mut visited = Vec::new();
    registry.visit_builds(|build| visited.push(build.identity_path().to_string()));
    assert_eq!(visited, expected);

    let listed: Vec<String> = registry
        .builds()
        .iter()
        .map(|build| build.identity_path().to_string())
        .collect();
    assert_eq!(listed, expected);
}

#[test]
fn included_builds_cannot_include_other_builds() {
    let executor = RecordingNodeExecutor::new();
    let tree = tree_with(app_with_lib().build(), &executor);
    let lib = tree.registry().included_build("lib").unwrap();

    match lib.assert_can_add(&BuildDefinition::new("nested")) {
        Err(BuildError::UnsupportedInclusion(message)) => {
            assert!(message.contains("cannot include build 'nested'"), "{message}");
        }
        other => panic!("expected unsupported inclusion, got {other:?}"),
    }

    let root = tree.root().unwrap();
    assert!(root.assert_can_add(&BuildDefinition::new("nested")).is_ok());
    assert!(matches!(
        tree.registry().add_included_build(BuildDefinition::new("app")),
        Err(BuildError::UnsupportedInclusion(_))
    ));
}

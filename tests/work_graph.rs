mod common;

use std::sync::Arc;
use std::thread;

use buildtree::errors::{BuildError, WorkGraphError};
use buildtree::lifecycle::LifecycleState;
use buildtree::tree::{BuildIdentifier, BuildState, Path};
use buildtree::workgraph::{BuildWorkGraphController, ExportedTaskNode, NodeLifecycle, TaskState};
use buildtree_test_utils::recording_executor::RecordingNodeExecutor;

use common::{app_with_lib, tree_with};

fn path(raw: &str) -> Path {
    Path::parse(raw).unwrap()
}

fn lib_work_graph(executor: &Arc<RecordingNodeExecutor>) -> (buildtree::tree::BuildTree, Arc<BuildWorkGraphController>) {
    let tree = tree_with(app_with_lib().build(), executor);
    let lib = tree.registry().included_build("lib").unwrap();
    let controller = Arc::clone(lib.work_graph());
    (tree, controller)
}

#[test]
fn exported_node_state_follows_its_lifecycle() {
    let node = ExportedTaskNode::new(BuildIdentifier::new(path(":lib")), path(":jar"));
    let rx = node.subscribe();
    assert_eq!(node.lifecycle(), NodeLifecycle::Idle);
    assert_eq!(node.task_state(), TaskState::Success);
    assert!(node.should_schedule());

    node.when_scheduled();
    assert!(!node.should_schedule());
    assert_eq!(node.task_state(), TaskState::Waiting);
    assert_eq!(*rx.borrow(), TaskState::Waiting);

    node.before_execution();
    node.task_completed(true);
    assert_eq!(*rx.borrow(), TaskState::Success);
    node.after_execution();
    assert_eq!(node.lifecycle(), NodeLifecycle::Finished);
    assert_eq!(node.task_state(), TaskState::Success);

    node.reset();
    assert_eq!(node.lifecycle(), NodeLifecycle::Idle);
}

#[test]
fn unscheduled_exported_node_reports_success_while_graph_runs() {
    let node = ExportedTaskNode::new(BuildIdentifier::new(path(":lib")), path(":docs"));
    node.before_execution();
    assert_eq!(node.lifecycle(), NodeLifecycle::NotScheduled);
    assert_eq!(node.task_state(), TaskState::Success);
    assert!(node.should_schedule());
    node.after_execution();
    assert_eq!(node.lifecycle(), NodeLifecycle::Idle);
}

#[test]
fn scheduled_node_that_never_completes_fails() {
    let node = ExportedTaskNode::new(BuildIdentifier::new(path(":lib")), path(":jar"));
    node.when_scheduled();
    node.after_execution();
    assert_eq!(node.task_state(), TaskState::Failed);
}

#[test]
fn locate_task_returns_the_same_node() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);
    let a = controller.locate_task(&path(":jar"));
    let b = controller.locate_task(&path(":jar"));
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.build(), controller.build());
}

#[test]
fn only_one_work_graph_at_a_time() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);

    let first = controller.new_work_graph().unwrap();
    assert!(matches!(
        controller.new_work_graph(),
        Err(WorkGraphError::AlreadyActive { .. })
    ));
    drop(first);
    assert!(!controller.has_active_graph());
    controller.new_work_graph().unwrap();
}

#[test]
fn schedule_runs_exported_task_and_publishes_outcome() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);
    let jar = controller.locate_task(&path(":jar"));
    let docs = controller.locate_task(&path(":docs"));

    let mut graph = controller.new_work_graph().unwrap();
    assert!(graph.schedule(&[Arc::clone(&jar)]).unwrap());
    assert!(!graph.schedule(&[Arc::clone(&jar)]).unwrap());
    assert_eq!(jar.task_state(), TaskState::Waiting);

    graph.finalize_graph().unwrap();
    let result = graph.run_work();
    assert!(result.is_success(), "{:?}", result.failures());

    assert_eq!(executor.executed(), vec![":lib:classes", ":lib:jar"]);
    assert_eq!(jar.task_state(), TaskState::Success);
    assert_eq!(jar.lifecycle(), NodeLifecycle::Finished);
    assert_eq!(docs.lifecycle(), NodeLifecycle::Idle);
}

#[test]
fn failed_exported_task_is_published_as_failed() {
    let executor = RecordingNodeExecutor::new();
    executor.fail(":lib:classes");
    let (_tree, controller) = lib_work_graph(&executor);
    let jar = controller.locate_task(&path(":jar"));

    let mut graph = controller.new_work_graph().unwrap();
    graph.schedule(&[Arc::clone(&jar)]).unwrap();
    graph.finalize_graph().unwrap();
    assert!(!graph.run_work().is_success());

    assert_eq!(executor.executed(), vec![":lib:classes"]);
    assert_eq!(jar.task_state(), TaskState::Failed);
}

#[test]
fn foreign_nodes_are_rejected() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);
    let stranger = Arc::new(ExportedTaskNode::new(controller.build().clone(), path(":jar")));

    let mut graph = controller.new_work_graph().unwrap();
    match graph.schedule(&[stranger]) {
        Err(BuildError::WorkGraph(WorkGraphError::ForeignNode { task, .. })) => {
            assert_eq!(task, ":jar");
        }
        other => panic!("expected foreign node error, got {other:?}"),
    }
}

#[test]
fn graph_is_bound_to_the_creating_thread_until_detached() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);
    let jar = controller.locate_task(&path(":jar"));

    let graph = controller.new_work_graph().unwrap();
    let (graph, moved) = {
        let jar = Arc::clone(&jar);
        thread::spawn(move || {
            let mut graph = graph;
            let result = graph.schedule(&[jar]);
            (graph, result)
        })
        .join()
        .unwrap()
    };
    assert!(matches!(
        moved,
        Err(BuildError::WorkGraph(WorkGraphError::NotOwner { .. }))
    ));

    let detached = graph.detach().unwrap();
    let result = thread::spawn(move || {
        let mut graph = detached.attach();
        graph.schedule(&[jar])?;
        graph.finalize_graph()?;
        Ok::<_, BuildError>(graph.run_work())
    })
    .join()
    .unwrap()
    .unwrap();
    assert!(result.is_success());
    assert_eq!(executor.executed(), vec![":lib:classes", ":lib:jar"]);
}

#[test]
fn running_before_finalizing_fails() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);
    let mut graph = controller.new_work_graph().unwrap();
    let result = graph.run_work();
    let failure = result.get_failure().expect("not finalized");
    assert!(matches!(
        failure.downcast_ref::<WorkGraphError>(),
        Some(WorkGraphError::NotFinalized { .. })
    ));
}

#[test]
fn graph_dropped_without_running_fails_its_exported_nodes() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);
    let jar = controller.locate_task(&path(":jar"));

    let mut graph = controller.new_work_graph().unwrap();
    graph.schedule(&[Arc::clone(&jar)]).unwrap();
    drop(graph);
    assert_eq!(jar.task_state(), TaskState::Failed);
    assert!(executor.executed().is_empty());

    // A new graph makes the node available again.
    let _graph = controller.new_work_graph().unwrap();
    assert_eq!(jar.lifecycle(), NodeLifecycle::Idle);
    assert_eq!(jar.task_state(), TaskState::Success);
}

#[test]
fn discarding_nodes_releases_waiters() {
    let executor = RecordingNodeExecutor::new();
    let (tree, controller) = lib_work_graph(&executor);
    let jar = controller.locate_task(&path(":jar"));
    jar.when_scheduled();

    let lib = tree.registry().included_build("lib").unwrap();
    assert!(lib.before_model_discarded(true).is_success());
    assert_eq!(jar.task_state(), TaskState::Failed);
    assert!(controller.exported_nodes().is_empty());
}

#[test]
fn graph_with_nothing_scheduled_runs_nothing() {
    let executor = RecordingNodeExecutor::new();
    let (_tree, controller) = lib_work_graph(&executor);
    let docs = controller.locate_task(&path(":docs"));

    let mut graph = controller.new_work_graph().unwrap();
    graph.finalize_graph().unwrap();
    assert!(graph.finalized_plan().is_some_and(|plan| plan.is_empty()));
    let result = graph.run_work();
    assert!(result.is_success(), "{:?}", result.failures());

    assert!(executor.executed().is_empty());
    assert_eq!(controller.lifecycle().state(), LifecycleState::Created);
    assert_eq!(docs.lifecycle(), NodeLifecycle::Idle);
}

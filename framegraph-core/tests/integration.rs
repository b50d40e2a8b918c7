//! Integration Tests for the Evaluation Core
//!
//! These tests drive the graph through the scheduler the way an embedding
//! host would: writes from the control side, evaluation on the render side.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use framegraph_core::{
    ContextKind, DerivedNode, DirtyState, FrameGraph, FrameReport, GraphError, ManualContext,
    NodeConfig, NodeGraph, NodeId, Scheduled, Scheduler, TokioContext, Value,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

fn id(raw: u64) -> NodeId {
    NodeId::from(raw)
}

fn sum(args: &[Value]) -> Value {
    args.iter().filter_map(Value::as_number).sum::<f64>().into()
}

/// Memoized reads do not recompute until something upstream changes.
#[test]
fn memoization_counts_one_recompute() {
    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), Some(&NodeConfig::new().with("value", 2.0))).unwrap();
    graph.create_derived_node(id(2), DerivedNode::infallible([id(1)], sum)).unwrap();

    assert_eq!(graph.value(id(2)), Ok(Value::Number(2.0)));
    assert_eq!(graph.value(id(2)), Ok(Value::Number(2.0)));
    assert_eq!(graph.node(id(2)).unwrap().evaluations(), 1);

    graph.set_value(id(1), 5.0).unwrap();
    assert_eq!(graph.value(id(2)), Ok(Value::Number(5.0)));
    assert_eq!(graph.node(id(2)).unwrap().evaluations(), 2);
}

/// A leaf write dirties every dependent; the next read recomputes and
/// cleans it.
#[test]
fn leaf_write_invalidates_dependents() {
    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), None).unwrap();
    graph.create_derived_node(id(2), DerivedNode::infallible([id(1)], sum)).unwrap();
    graph.create_derived_node(id(3), DerivedNode::infallible([id(1)], sum)).unwrap();
    graph.settle();

    graph.set_value(id(1), 4.0).unwrap();
    for dependent in [id(2), id(3)] {
        assert_eq!(graph.node(dependent).unwrap().dirty_state(), DirtyState::Dirty);
        assert_eq!(graph.peek(dependent), Ok(None));
    }

    assert_eq!(graph.value(id(2)), Ok(Value::Number(4.0)));
    assert_eq!(graph.node(id(2)).unwrap().dirty_state(), DirtyState::Clean);
    // Pull is per node: the sibling stays dirty until read.
    assert_eq!(graph.node(id(3)).unwrap().dirty_state(), DirtyState::Dirty);
}

/// No edge or node change leaves a clean node holding a stale value.
#[test]
fn structural_changes_never_leave_stale_values() {
    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), Some(&NodeConfig::new().with("value", 1.0))).unwrap();
    graph.create_derived_node(id(2), DerivedNode::infallible([id(1)], sum)).unwrap();
    assert_eq!(graph.value(id(2)), Ok(Value::Number(1.0)));

    assert!(graph.disconnect(id(1), id(2)).is_err());
    graph.set_value(id(1), 99.0).unwrap();
    assert_eq!(graph.value(id(2)), Ok(Value::Number(99.0)));

    graph.remove_node(id(1)).unwrap();
    graph.create_value_node(id(1), Some(&NodeConfig::new().with("value", 5.0))).unwrap();
    assert_eq!(graph.value(id(2)), Ok(Value::Number(5.0)));
    graph.set_value(id(1), 7.0).unwrap();
    assert_eq!(graph.value(id(2)), Ok(Value::Number(7.0)));
}

/// Setting the same value twice signals dependents twice.
#[test]
fn idempotent_leaf_set() {
    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), None).unwrap();
    graph.create_derived_node(id(2), DerivedNode::infallible([id(1)], sum)).unwrap();
    graph.settle();
    let before = graph.node(id(2)).unwrap().invalidations();

    graph.set_value(id(1), 8.0).unwrap();
    graph.set_value(id(1), 8.0).unwrap();

    let leaf = graph.node(id(1)).unwrap();
    assert!(leaf.is_clean());
    assert_eq!(leaf.memoized(), Some(Value::Number(8.0)));
    assert_eq!(graph.node(id(2)).unwrap().invalidations() - before, 2);
}

/// Leaves without a configured value are unset; a configured value is
/// available without an evaluation pass.
#[test]
fn unset_default_and_configured_value() {
    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), None).unwrap();
    graph.create_value_node(id(2), Some(&NodeConfig::new().with("value", 3.5))).unwrap();

    assert_eq!(graph.value(id(1)), Ok(Value::Unset));
    assert_ne!(graph.value(id(1)), Ok(Value::Number(0.0)));

    assert_eq!(graph.peek(id(2)), Ok(Some(Value::Number(3.5))));
    assert_eq!(graph.node(id(2)).unwrap().evaluations(), 0);
}

/// A configuration value of the wrong type is rejected at creation.
#[test]
fn invalid_config_is_rejected() {
    let mut graph = NodeGraph::new();
    let config: NodeConfig = serde_json::from_str(r#"{ "value": "tall" }"#).unwrap();
    assert!(matches!(
        graph.create_value_node(id(1), Some(&config)),
        Err(GraphError::InvalidConfig { .. })
    ));
    assert!(!graph.contains(id(1)));
}

/// N requests before the trigger runs produce one trigger invocation.
#[test]
fn coalescing_across_threads() {
    init_tracing();
    let scheduler = Scheduler::new();
    let render = ManualContext::new();
    scheduler.attach(ContextKind::Render, render.clone());

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    scheduler.set_trigger(ContextKind::Render, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let dispatched = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..500 {
                    if scheduler.schedule_on_render() == Ok(Scheduled::Dispatched) {
                        dispatched.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(render.pending(), 1);
    render.run_pending();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Control writes V, asks for a render pass, and after one pass reads the
/// settled value; the dependent is clean and up to date.
#[test]
fn cross_context_ordering() {
    init_tracing();
    let scheduler = Scheduler::new();
    let control = ManualContext::new();
    let render = ManualContext::new();
    scheduler.attach(ContextKind::Control, control.clone());
    scheduler.attach(ContextKind::Render, render.clone());

    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), None).unwrap();
    graph
        .create_derived_node(
            id(2),
            DerivedNode::infallible([id(1)], |args| match args[0] {
                Value::Number(n) => Value::Number(n + 1.0),
                Value::Unset => Value::Unset,
            }),
        )
        .unwrap();
    let frames = FrameGraph::new(scheduler.clone(), graph);

    frames.set_value(id(1), 10.0).unwrap();
    assert_eq!(scheduler.schedule_on_render(), Ok(Scheduled::Coalesced));

    assert_eq!(render.run_pending(), 1);
    assert_eq!(scheduler.passes(ContextKind::Render), 1);

    assert_eq!(frames.settled(id(1)), Ok(Value::Number(10.0)));
    assert_eq!(frames.settled(id(2)), Ok(Value::Number(11.0)));
    frames.inspect(|graph| {
        let dependent = graph.node(id(2)).unwrap();
        assert_eq!(dependent.dirty_state(), DirtyState::Clean);
        assert_eq!(dependent.memoized(), Some(Value::Number(11.0)));
    });

    control.run_pending();
    assert_eq!(scheduler.passes(ContextKind::Control), 1);
}

/// A request accepted before the render host is swapped still runs, once,
/// on the new host.
#[test]
fn host_swap_keeps_a_pending_frame() {
    let scheduler = Scheduler::new();
    let old = ManualContext::new();
    scheduler.attach(ContextKind::Render, old.clone());

    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), Some(&NodeConfig::new().with("value", 2.0))).unwrap();
    let frames = FrameGraph::new(scheduler.clone(), graph);

    assert_eq!(frames.request_frame(), Ok(Scheduled::Dispatched));
    let new = ManualContext::new();
    scheduler.attach(ContextKind::Render, new.clone());

    old.run_pending();
    assert_eq!(frames.frame(), 0);
    new.run_pending();
    assert_eq!(frames.frame(), 1);
    assert_eq!(frames.settled(id(1)), Ok(Value::Number(2.0)));
}

/// A derived node whose input disappeared fails instead of defaulting.
#[test]
fn missing_dependency_fails_evaluation() {
    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), Some(&NodeConfig::new().with("value", 1.0))).unwrap();
    graph.create_derived_node(id(2), DerivedNode::infallible([id(1)], sum)).unwrap();
    graph.remove_node(id(1)).unwrap();

    let settlement = graph.settle();
    assert!(settlement.recomputed.is_empty());
    assert_eq!(settlement.failures.len(), 1);
    assert_eq!(settlement.failures[0].root_cause(), &GraphError::NodeNotFound(id(1)));
}

/// Full round trip on real threads: tokio-hosted control and render
/// contexts, writes from outside both.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tokio_hosted_round_trip() {
    init_tracing();
    let handle = tokio::runtime::Handle::current();
    let scheduler = Scheduler::new();
    let (control, _control_task) = TokioContext::spawn(&handle, "control");
    let (render, _render_task) = TokioContext::spawn(&handle, "render");
    scheduler.attach(ContextKind::Control, control);
    scheduler.attach(ContextKind::Render, render);

    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), None).unwrap();
    graph.create_value_node(id(2), None).unwrap();
    graph.create_derived_node(id(3), DerivedNode::infallible([id(1), id(2)], sum)).unwrap();
    let frames = FrameGraph::new(scheduler, graph);

    let (tx, mut rx) = mpsc::unbounded_channel::<FrameReport>();
    frames.on_settled(move |report| {
        let _ = tx.send(report.clone());
    });

    frames.set_value(id(1), 4.0).unwrap();
    frames.set_value(id(2), 6.0).unwrap();

    loop {
        let report = rx.recv().await.expect("control context stopped");
        if report.values.contains(&(id(3), Value::Number(10.0))) {
            break;
        }
    }
    assert_eq!(frames.settled(id(3)), Ok(Value::Number(10.0)));
}

/// Jobs submitted from another thread while a pass runs are not lost.
#[test]
fn writes_during_a_pass_get_their_own_frame() {
    let scheduler = Scheduler::new();
    let render = ManualContext::new();
    scheduler.attach(ContextKind::Render, render.clone());

    let mut graph = NodeGraph::new();
    graph.create_value_node(id(1), None).unwrap();
    let frames = FrameGraph::new(scheduler, graph);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let writer = frames.clone();
    let log = seen.clone();
    frames
        .with_graph(move |graph| {
            log.lock().push(graph.len());
            // Issued from inside the pass; must land in the next one.
            writer.set_value(id(1), 42.0).map(drop)
        })
        .unwrap();

    render.run_pending();
    assert_eq!(frames.settled(id(1)), Ok(Value::Unset));
    assert_eq!(render.pending(), 1);

    render.run_pending();
    assert_eq!(frames.settled(id(1)), Ok(Value::Number(42.0)));
    assert_eq!(frames.frame(), 2);
    assert_eq!(*seen.lock(), vec![1]);
}

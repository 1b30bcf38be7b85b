//! Edge-graph scenarios: linear chains, conversion adapters, fan-out
//! operators, typeless resolution, and connection-safety failures.

use std::sync::{Arc, Mutex};

use rill_flow::{
    link_typeless, make_edge, make_edge_converting, make_edge_typeless, Broadcast,
    BroadcastTypeless, CombineLatest2, Conditional, FlowError, Node, NodeComponent, Queue, Read,
    Router, Sink, SinkComponent, Source, SourceComponent, Status, UnknownKeyPolicy,
};

fn collector<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(T) + Send + 'static) {
    let store: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&store);
    (store, move |value| {
        sink_store.lock().expect("collector lock").push(value)
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn source_to_sink_delivers_in_order_then_closes() {
    let (seen, push) = collector();
    let source = Source::from_iter(0..3);
    let sink = Sink::new(push);

    make_edge(&source, &sink).expect("source -> sink");

    source.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn source_to_node_to_sink_passes_values_through() {
    let (seen, push) = collector();
    let source = Source::from_iter(0..3);
    let node = Node::passthrough();
    let sink = Sink::new(push);

    make_edge(&source, &node).expect("source -> node");
    make_edge(&node, &sink).expect("node -> sink");

    source.run().await;
    node.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_chained_nodes_apply_their_maps_in_order() {
    let (seen, push) = collector();
    let source = Source::from_iter(0..3);
    let double = Node::new(|value: i64| value * 2);
    let inc = Node::new(|value: i64| value + 1);
    let sink = Sink::new(push);

    make_edge(&source, &double).expect("source -> double");
    make_edge(&double, &inc).expect("double -> inc");
    make_edge(&inc, &sink).expect("inc -> sink");

    source.run().await;
    double.run().await;
    inc.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![1, 3, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn int_source_reaches_float_sink_through_the_upcast_adapter() {
    let (seen, push) = collector::<f32>();
    let source = Source::from_iter(0..3i32);
    let sink = Sink::new(push);

    make_edge_converting::<i32, f32, _, _>(&source, &sink).expect("source -> adapter -> sink");

    source.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0.0, 1.0, 2.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn double_source_component_narrows_to_a_float_sink() {
    let (seen, push) = collector::<f32>();
    let source = SourceComponent::from_iter([1.5f64, 2.5]);
    let sink = Sink::new(push);

    make_edge_converting::<f64, f32, _, _>(&source, &sink).expect("component -> adapter -> sink");

    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![1.5, 2.5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_second_sink_on_a_single_fan_source_is_rejected() {
    let (_seen, push) = collector::<i64>();
    let (_seen2, push2) = collector::<i64>();
    let source = Source::from_iter(0..3);
    let sink1 = Sink::new(push);
    let sink2 = Sink::new(push2);

    make_edge(&source, &sink1).expect("first edge");
    let err = make_edge(&source, &sink2).expect_err("second edge must fail");
    assert_eq!(err, FlowError::AlreadyConnected);

    // Cleanup succeeds: edges first, then nodes.
    drop(source);
    drop(sink1);
    drop(sink2);
}

#[tokio::test(flavor = "multi_thread")]
async fn typeless_edge_connects_matching_tags_and_rejects_mismatches() {
    let (seen, push) = collector::<i64>();
    let source = Source::from_iter(0..3i64);
    let sink = Sink::new(push);
    make_edge_typeless(&source, &sink).expect("same tag connects");
    source.run().await;
    sink.run().await;
    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);

    let int_source = Source::from_iter(0..3i64);
    let (_floats, push) = collector::<f64>();
    let float_sink = Sink::new(push);
    let err = make_edge_typeless(&int_source, &float_sink).expect_err("tag mismatch");
    assert!(matches!(err, FlowError::TypeMismatch { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn source_pushes_into_a_sink_component() {
    let (seen, _push) = collector::<i64>();
    let store = Arc::clone(&seen);
    let completed = Arc::new(Mutex::new(false));
    let completed_flag = Arc::clone(&completed);

    let source = Source::from_iter(0..3);
    let sink = SinkComponent::new(move |value| {
        store.lock().expect("component store lock").push(value);
        Status::Success
    })
    .on_complete(move || *completed_flag.lock().expect("completed lock") = true);

    make_edge(&source, &sink).expect("source -> sink component");

    source.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
    assert!(*completed.lock().expect("completed lock"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sink_pulls_from_a_source_component() {
    let (seen, push) = collector::<i64>();
    let source = SourceComponent::from_iter(0..3);
    let sink = Sink::new(push);

    make_edge(&source, &sink).expect("source component -> sink");

    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn source_component_feeds_a_node_which_feeds_a_sink() {
    let (seen, push) = collector::<i64>();
    let source = SourceComponent::from_iter(0..3);
    let node = Node::passthrough();
    let sink = Sink::new(push);

    make_edge(&source, &node).expect("component -> node");
    make_edge(&node, &sink).expect("node -> sink");

    node.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn node_component_transforms_synchronously_between_components() {
    let (seen, _push) = collector::<i64>();
    let store = Arc::clone(&seen);

    let source = Source::from_iter(0..3);
    let node = NodeComponent::new(|value: i64| value + 1);
    let sink = SinkComponent::new(move |value| {
        store.lock().expect("component store lock").push(value);
        Status::Success
    });

    make_edge(&source, &node).expect("source -> node component");
    make_edge(&node, &sink).expect("node component -> sink component");

    source.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_passive_components_cannot_be_joined() {
    let source = SourceComponent::from_iter(0..3i64);
    let sink = SinkComponent::new(|_value: i64| Status::Success);
    let err = make_edge(&source, &sink).expect_err("no task can drive this edge");
    assert_eq!(err, FlowError::Incompatible);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_buffers_between_a_source_and_a_sink() {
    let (seen, push) = collector::<i64>();
    let source = Source::from_iter(0..3);
    let queue = Queue::new();
    let sink = Sink::new(push);

    make_edge(&source, &queue).expect("source -> queue");
    make_edge(&queue, &sink).expect("queue -> sink");

    source.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_work_steals_across_two_sinks() {
    let (seen1, push1) = collector::<i64>();
    let (seen2, push2) = collector::<i64>();
    let source = Source::from_iter(0..20);
    let queue = Queue::new();
    let sink1 = Sink::new(push1);
    let sink2 = Sink::new(push2);

    make_edge(&source, &queue).expect("source -> queue");
    make_edge(&queue, &sink1).expect("queue -> sink1");
    make_edge(&queue, &sink2).expect("queue -> sink2");

    source.run().await;
    tokio::join!(sink1.run(), sink2.run());

    let mut all: Vec<i64> = seen1.lock().expect("seen1 lock").clone();
    all.extend(seen2.lock().expect("seen2 lock").iter().copied());
    all.sort_unstable();
    assert_eq!(all, (0..20).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn router_splits_odd_and_even_values() {
    let (odds, push_odd) = collector::<i64>();
    let (evens, push_even) = collector::<i64>();
    let source = Source::from_iter(0..3);
    let router = Router::new(|value: &i64| if value % 2 == 1 { "odd" } else { "even" });
    let odd_sink = Sink::new(push_odd);
    let even_sink = Sink::new(push_even);

    make_edge(&source, &router).expect("source -> router");
    make_edge(&router.source("odd"), &odd_sink).expect("router odd -> sink");
    make_edge(&router.source("even"), &even_sink).expect("router even -> sink");

    source.run().await;
    odd_sink.run().await;
    even_sink.run().await;

    assert_eq!(*odds.lock().expect("odds lock"), vec![1]);
    assert_eq!(*evens.lock().expect("evens lock"), vec![0, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn router_drops_unknown_keys_and_keeps_the_stream_running() {
    let (odds, push_odd) = collector::<i64>();
    let source = Source::from_iter(0..5);
    let router = Router::new(|value: &i64| if value % 2 == 1 { "odd" } else { "even" });
    let odd_sink = Sink::new(push_odd);

    make_edge(&source, &router).expect("source -> router");
    make_edge(&router.source("odd"), &odd_sink).expect("router odd -> sink");

    // Even values have no route; with the default policy they are
    // dropped with a warning and the stream continues.
    source.run().await;
    odd_sink.run().await;

    assert_eq!(*odds.lock().expect("odds lock"), vec![1, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn router_fail_policy_surfaces_an_error_status() {
    let source = Source::from_iter(0..3);
    let router = Router::with_policy(|_value: &i64| "nowhere", UnknownKeyPolicy::Fail);

    make_edge(&source, &router).expect("source -> router");

    // The first write hits a missing route and reports Error; the
    // source stops producing.
    source.run().await;
    drop(router);
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_delivers_every_value_to_every_sink() {
    let (seen1, push1) = collector::<i64>();
    let (seen2, push2) = collector::<i64>();
    let source = Source::from_iter(0..3);
    let broadcast = Broadcast::new();
    let sink1 = Sink::new(push1);
    let sink2 = Sink::new(push2);

    make_edge(&source, &broadcast).expect("source -> broadcast");
    make_edge(&broadcast, &sink1).expect("broadcast -> sink1");
    make_edge(&broadcast, &sink2).expect("broadcast -> sink2");

    source.run().await;
    sink1.run().await;
    sink2.run().await;

    assert_eq!(*seen1.lock().expect("seen1 lock"), vec![0, 1, 2]);
    assert_eq!(*seen2.lock().expect("seen2 lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn typeless_broadcast_resolves_sink_first() {
    let (seen, push) = collector::<i64>();
    let source = Source::from_iter(0..3i64);
    let broadcast = BroadcastTypeless::new();
    let sink = Sink::new(push);

    make_edge(&broadcast, &sink).expect("broadcast -> sink fixes the type");
    assert!(broadcast.resolved_type().is_some());
    make_edge(&source, &broadcast).expect("source -> broadcast");

    source.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn typeless_broadcast_resolves_source_first() {
    let (seen, push) = collector::<i64>();
    let source = Source::from_iter(0..3i64);
    let broadcast = BroadcastTypeless::new();
    let sink = Sink::new(push);

    make_edge(&source, &broadcast).expect("source -> broadcast fixes the type");
    make_edge(&broadcast, &sink).expect("broadcast -> sink");

    source.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn chained_typeless_broadcasts_propagate_the_type_transitively() {
    let (seen, push) = collector::<i64>();
    let source = Source::from_iter(0..3i64);
    let broadcast1 = BroadcastTypeless::new();
    let broadcast2 = BroadcastTypeless::new();
    let sink = Sink::new(push);

    make_edge(&broadcast2, &sink).expect("broadcast2 -> sink");
    link_typeless(&broadcast1, &broadcast2).expect("chain broadcasts");
    make_edge(&source, &broadcast1).expect("source -> broadcast1");

    assert_eq!(broadcast1.resolved_type(), broadcast2.resolved_type());

    source.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_sources_fan_into_chained_typeless_broadcasts_and_two_sinks() {
    let (seen1, push1) = collector::<i64>();
    let (seen2, push2) = collector::<i64>();
    let source1 = Source::from_iter(0..3i64);
    let source2 = Source::from_iter(10..13i64);
    let broadcast1 = BroadcastTypeless::new();
    let broadcast2 = BroadcastTypeless::new();
    let sink1 = Sink::new(push1);
    let sink2 = Sink::new(push2);

    make_edge(&source1, &broadcast1).expect("source1 -> broadcast1");
    make_edge(&source2, &broadcast1).expect("source2 -> broadcast1");
    link_typeless(&broadcast1, &broadcast2).expect("chain broadcasts");
    make_edge(&broadcast2, &sink1).expect("broadcast2 -> sink1");
    make_edge(&broadcast2, &sink2).expect("broadcast2 -> sink2");

    source1.run().await;
    source2.run().await;
    sink1.run().await;
    sink2.run().await;

    let mut expected: Vec<i64> = (0..3).chain(10..13).collect();
    expected.sort_unstable();
    for seen in [&seen1, &seen2] {
        let mut got = seen.lock().expect("seen lock").clone();
        got.sort_unstable();
        assert_eq!(got, expected);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn a_resolved_typeless_broadcast_rejects_a_different_type() {
    let (_seen, push) = collector::<i64>();
    let broadcast = BroadcastTypeless::new();
    let sink = Sink::new(push);
    make_edge(&broadcast, &sink).expect("int sink fixes the type");

    let float_source = Source::from_iter([0.5f64, 1.5]);
    let err = make_edge(&float_source, &broadcast).expect_err("float producer must fail");
    assert!(matches!(err, FlowError::TypeMismatch { .. }));

    // The broadcast still holds the sink's writable half; release it
    // before the sink goes away.
    drop(broadcast);
    drop(sink);
}

#[tokio::test(flavor = "multi_thread")]
async fn combine_latest_emits_once_both_slots_are_seeded() {
    let (seen, push) = collector::<(i64, i64)>();
    let source1 = Source::from_iter(0..3i64);
    let source2 = Source::from_iter(10..13i64);
    let combine = CombineLatest2::new();
    let sink = Sink::new(push);

    make_edge(&source1, &combine.sink_a()).expect("source1 -> combine.a");
    make_edge(&source2, &combine.sink_b()).expect("source2 -> combine.b");
    make_edge(&combine, &sink).expect("combine -> sink");

    source1.run().await;
    source2.run().await;
    sink.run().await;

    // Slot a is fully drained before slot b starts, so every emission
    // pairs a's latest value with each arrival on b.
    assert_eq!(
        *seen.lock().expect("seen lock"),
        vec![(2, 10), (2, 11), (2, 12)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn conditional_forwards_only_matching_values() {
    let (seen, push) = collector::<i64>();
    let source = Source::from_iter(0..6);
    let conditional = Conditional::new(|value: &i64| value % 2 == 1);
    let sink = Sink::new(push);

    make_edge(&source, &conditional).expect("source -> conditional");
    make_edge(&conditional, &sink).expect("conditional -> sink");

    source.run().await;
    sink.run().await;

    assert_eq!(*seen.lock().expect("seen lock"), vec![1, 3, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn an_unconnected_source_runs_to_completion() {
    let source = Source::from_iter(0..3i64);
    source.run().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn source_component_read_statuses_follow_the_generator() {
    let source = SourceComponent::from_iter(0..1i64);
    let sink = Sink::new(|_value: i64| {});
    make_edge(&source, &sink).expect("component -> sink");
    sink.run().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn every_node_kind_can_be_created_and_dropped_unconnected() {
    drop(Source::from_iter(0..3i64));
    drop(Sink::new(|_value: i64| {}));
    drop(Node::<i64>::passthrough());
    drop(SourceComponent::from_iter(0..3i64));
    drop(SinkComponent::new(|_value: i64| Status::Success));
    drop(NodeComponent::<i64>::passthrough());
    drop(Broadcast::<i64>::new());
    drop(BroadcastTypeless::new());
    drop(Router::<&'static str, i64>::new(|_| "key"));
    drop(Conditional::<i64>::new(|_| true));
    drop(CombineLatest2::<i64, i64>::new());
    drop(Queue::<i64>::new());
}

#[tokio::test(flavor = "multi_thread")]
async fn read_exposes_the_status_codes() {
    assert_eq!(Read::<i64>::Closed.status(), Status::Closed);
    assert_eq!(Read::Item(1i64).status(), Status::Success);
    assert_eq!(Read::<i64>::Timeout.status().code(), 2);
}

//! Executor scenarios: registration-time validation, a full pipeline
//! driven end to end through the control plane, and lifecycle
//! round-trips.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rill_control::testing::MockArchitect;
use rill_control::{ClientConfig, PreparedConnect};
use rill_exec::{
    ExecError, Executor, ExecutorConfig, PipelineDefinition, SegmentDefinition, ValidationError,
};
use rill_flow::{make_edge, Sink, Source};

const JOIN_BOUND: Duration = Duration::from_secs(5);

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn executor_with_architect() -> (MockArchitect, Executor) {
    init_tracing();
    let (architect, transport) = MockArchitect::spawn();
    let config = ExecutorConfig {
        client: ClientConfig {
            machine_id: 3,
            ..ClientConfig::default()
        },
    };
    (
        architect,
        Executor::new(config, PreparedConnect::new(transport)),
    )
}

fn linear_pipeline(collected: Arc<Mutex<Vec<i64>>>) -> PipelineDefinition {
    let mut pipeline = PipelineDefinition::new("linear");
    pipeline.add_segment(SegmentDefinition::new(
        "producer",
        Vec::<String>::new(),
        ["data"],
        |ctx| {
            let egress = ctx.egress::<i64>("data")?;
            let source = Source::from_iter(0..3);
            make_edge(&source, &egress)?;
            ctx.spawn(async move {
                source.run().await;
            });
            Ok(())
        },
    ));
    pipeline.add_segment(SegmentDefinition::new(
        "consumer",
        ["data"],
        Vec::<String>::new(),
        move |ctx| {
            let ingress = ctx.ingress::<i64>("data")?;
            let store = Arc::clone(&collected);
            let sink = Sink::new(move |value| store.lock().expect("store lock").push(value));
            make_edge(&ingress, &sink)?;
            ctx.spawn(async move {
                sink.run().await;
            });
            Ok(())
        },
    ));
    pipeline
}

#[tokio::test(flavor = "multi_thread")]
async fn a_linear_pipeline_runs_end_to_end_through_the_executor() {
    let (_architect, executor) = executor_with_architect();
    let collected = Arc::new(Mutex::new(Vec::new()));

    executor
        .register_pipeline(linear_pipeline(Arc::clone(&collected)))
        .expect("register pipeline");
    executor.start().await.expect("executor start");

    // The sink observes every value and then the closed signal; stop
    // joins the segment tasks.
    executor.stop().await;
    tokio::time::timeout(JOIN_BOUND, executor.join())
        .await
        .expect("join within bound");

    assert_eq!(*collected.lock().expect("store lock"), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_rejects_an_empty_pipeline() {
    let (_architect, executor) = executor_with_architect();
    let err = executor
        .register_pipeline(PipelineDefinition::new("empty"))
        .expect_err("empty pipeline must fail");
    assert!(matches!(
        err,
        ExecError::Validation(ValidationError::EmptyPipeline { .. })
    ));
    executor.kill();
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_rejects_an_egress_only_port() {
    let (_architect, executor) = executor_with_architect();
    let mut pipeline = PipelineDefinition::new("dangling");
    pipeline.add_segment(SegmentDefinition::new(
        "producer",
        Vec::<String>::new(),
        ["data"],
        |_ctx| Ok(()),
    ));
    let err = executor
        .register_pipeline(pipeline)
        .expect_err("dangling port must fail");
    assert!(matches!(
        err,
        ExecError::Validation(ValidationError::DanglingPort { .. })
    ));
    executor.kill();
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_rejects_a_multi_typed_port() {
    let (_architect, executor) = executor_with_architect();
    let mut pipeline = PipelineDefinition::new("multi");
    pipeline.add_segment(SegmentDefinition::new(
        "producer-a",
        Vec::<String>::new(),
        ["data"],
        |_ctx| Ok(()),
    ));
    pipeline.add_segment(SegmentDefinition::new(
        "producer-b",
        Vec::<String>::new(),
        ["data"],
        |_ctx| Ok(()),
    ));
    pipeline.add_segment(SegmentDefinition::new(
        "consumer",
        ["data"],
        Vec::<String>::new(),
        |_ctx| Ok(()),
    ));
    let err = executor
        .register_pipeline(pipeline)
        .expect_err("multi-typed port must fail");
    assert!(matches!(
        err,
        ExecError::Validation(ValidationError::MultiTypedPort { .. })
    ));
    executor.kill();
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_is_refused_after_start() {
    let (_architect, executor) = executor_with_architect();
    executor.start().await.expect("executor start");

    let collected = Arc::new(Mutex::new(Vec::new()));
    let err = executor
        .register_pipeline(linear_pipeline(collected))
        .expect_err("late registration must fail");
    assert!(matches!(err, ExecError::AlreadyStarted));

    executor.stop().await;
    executor.join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_port_types_fail_the_start() {
    let (_architect, executor) = executor_with_architect();
    let mut pipeline = PipelineDefinition::new("mistyped");
    pipeline.add_segment(SegmentDefinition::new(
        "producer",
        Vec::<String>::new(),
        ["data"],
        |ctx| {
            let egress = ctx.egress::<i64>("data")?;
            let source = Source::from_iter(0..3);
            make_edge(&source, &egress)?;
            ctx.spawn(async move {
                source.run().await;
            });
            Ok(())
        },
    ));
    pipeline.add_segment(SegmentDefinition::new(
        "consumer",
        ["data"],
        Vec::<String>::new(),
        |ctx| {
            // Requests a different item type than the producer fixed.
            let _ingress = ctx.ingress::<f64>("data")?;
            Ok(())
        },
    ));
    executor.register_pipeline(pipeline).expect("graph is valid");
    let error = executor.start().await.expect_err("start must fail");
    assert!(error.to_string().contains("data"));
    tokio::time::timeout(JOIN_BOUND, executor.join())
        .await
        .expect("join after failed start");
}

#[tokio::test(flavor = "multi_thread")]
async fn start_and_stop_are_idempotent() {
    let (_architect, executor) = executor_with_architect();
    executor.start().await.expect("first start");
    executor.start().await.expect("second start is a no-op");
    executor.stop().await;
    executor.stop().await;
    tokio::time::timeout(JOIN_BOUND, executor.join())
        .await
        .expect("join within bound");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_broken_control_plane_stream_unblocks_join() {
    let (architect, executor) = executor_with_architect();
    executor.start().await.expect("executor start");

    architect.drop_stream().await;

    tokio::time::timeout(JOIN_BOUND, executor.join())
        .await
        .expect("join unblocks after transport failure");
}

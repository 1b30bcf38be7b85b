//! End-to-end client scenarios against the in-process architect.

use std::collections::BTreeSet;
use std::time::Duration;

use rill_control::testing::MockArchitect;
use rill_control::{
    ClientConfig, ClientError, ClientState, ControlPlaneClient, PreparedConnect, ProgressMode,
};
use rill_core::Service;
use rill_proto::messages::{PipelineAssignmentRequest, PipelineAssignmentResponse};
use rill_proto::EventType;

const JOIN_BOUND: Duration = Duration::from_secs(5);

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn test_config() -> ClientConfig {
    ClientConfig {
        machine_id: 11,
        worker_addresses: vec!["local://worker-0".to_string(), "local://worker-1".to_string()],
        ..ClientConfig::default()
    }
}

async fn start_client(config: ClientConfig) -> (MockArchitect, ControlPlaneClient) {
    init_tracing();
    let (architect, transport) = MockArchitect::spawn();
    let client = ControlPlaneClient::new(config, PreparedConnect::new(transport));
    client.service_start().await.expect("client start");
    client.service_await_live().await.expect("client live");
    (architect, client)
}

fn assignment_request(name: &str) -> PipelineAssignmentRequest {
    PipelineAssignmentRequest {
        machine_id: 11,
        pipeline_name: name.to_string(),
        segment_names: vec![format!("{name}-segment")],
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn client_registers_and_becomes_operational() {
    let (_architect, client) = start_client(test_config()).await;

    assert_eq!(client.state(), ClientState::Operational);
    assert_eq!(client.machine_id(), 11);
    assert_eq!(client.instance_ids().len(), 2);

    // Second start is a no-op while running.
    client.service_start().await.expect("idempotent start");

    client.service_stop().await;
    tokio::time::timeout(JOIN_BOUND, client.service_await_join())
        .await
        .expect("join within bound");
    client.service_stop().await; // idempotent after Stopped
}

#[tokio::test(flavor = "multi_thread")]
async fn unary_responses_match_their_tags_regardless_of_arrival_order() {
    let (architect, client) = start_client(test_config()).await;
    architect.hold_unary_responses();

    let a = client
        .async_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("a"),
        )
        .await
        .expect("issue unary a");
    let b = client
        .async_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("b"),
        )
        .await
        .expect("issue unary b");
    let c = client
        .async_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("c"),
        )
        .await
        .expect("issue unary c");

    while architect.held_count() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Respond C, A, B.
    architect.release_held(&[2, 0, 1]).await;

    let response_a = a.await_response().await.expect("response a");
    let response_b = b.await_response().await.expect("response b");
    let response_c = c.await_response().await.expect("response c");
    assert_eq!(response_a.assignments[0].segment_name, "a-segment");
    assert_eq!(response_b.assignments[0].segment_name, "b-segment");
    assert_eq!(response_c.assignments[0].segment_name, "c-segment");

    client.service_stop().await;
    client.service_await_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_unary_retires_its_tag_and_late_response_is_discarded() {
    let (architect, client) = start_client(test_config()).await;
    architect.hold_unary_responses();

    let slow = client
        .async_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("slow"),
        )
        .await
        .expect("issue slow unary");
    while architect.held_count() < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let err = slow
        .await_response_with_deadline(Duration::from_millis(50))
        .await
        .expect_err("deadline must expire");
    assert!(matches!(err, ClientError::Timeout));

    // The late response carries a retired tag; it must be discarded
    // without disturbing later requests.
    architect.release_held(&[0]).await;
    architect.answer_unary_responses();
    let fresh = client
        .await_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("fresh"),
        )
        .await
        .expect("fresh unary after retired tag");
    assert_eq!(fresh.assignments[0].segment_name, "fresh-segment");

    client.service_stop().await;
    client.service_await_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_failure_fails_pending_unaries_and_unblocks_join() {
    let (architect, client) = start_client(test_config()).await;
    architect.hold_unary_responses();

    let first = client
        .async_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("first"),
        )
        .await
        .expect("issue first unary");
    let second = client
        .async_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("second"),
        )
        .await
        .expect("issue second unary");
    while architect.held_count() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    architect.drop_stream().await;

    let first_err = first.await_response().await.expect_err("first must fail");
    let second_err = second.await_response().await.expect_err("second must fail");
    assert!(matches!(first_err, ClientError::Transport));
    assert!(matches!(second_err, ClientError::Transport));

    tokio::time::timeout(JOIN_BOUND, client.service_await_join())
        .await
        .expect("join within bound after transport failure");
    assert_eq!(client.state(), ClientState::FailedToConnect);

    let refused = client
        .await_unary::<PipelineAssignmentResponse, _>(
            EventType::ClientUnaryRequestPipelineAssignment,
            &assignment_request("refused"),
        )
        .await
        .expect_err("client is no longer ready");
    assert!(matches!(refused, ClientError::NotReady));
}

#[tokio::test(flavor = "multi_thread")]
async fn state_updates_are_monotonic_and_new_subscribers_see_the_current_value() {
    let (architect, client) = start_client(test_config()).await;

    let mut updates = client.state_updates();
    architect.push_state_update(|state| state.machine_count = 5).await;
    let first = tokio::time::timeout(JOIN_BOUND, updates.next())
        .await
        .expect("first update in time")
        .expect("first update");
    assert_eq!(first.state.machine_count, 5);

    architect.push_state_update(|state| state.machine_count = 6).await;
    let second = tokio::time::timeout(JOIN_BOUND, updates.next())
        .await
        .expect("second update in time")
        .expect("second update");
    assert!(second.update_count > first.update_count);

    // A fresh subscriber starts from the current snapshot.
    let late = client.state_updates();
    assert_eq!(late.current().state.machine_count, 6);
    assert_eq!(late.current().update_count, client.state_update_count());

    client.service_stop().await;
    client.service_await_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_service_membership_follows_state_updates() {
    let (_architect, client) = start_client(test_config()).await;

    let roles: BTreeSet<String> = ["publisher".to_string(), "subscriber".to_string()]
        .into_iter()
        .collect();
    let service = client
        .get_or_create_subscription_service("port/data", roles.clone())
        .await
        .expect("create subscription service");
    assert!(client.has_subscription_service("port/data"));

    // Creation is once per name: a second call returns the same
    // instance.
    let again = client
        .get_or_create_subscription_service("port/data", roles)
        .await
        .expect("reuse subscription service");
    assert_eq!(service.name(), again.name());

    // The architect records our registration and publishes membership.
    let mut members = service.watch_members();
    tokio::time::timeout(JOIN_BOUND, async {
        loop {
            {
                let current = members.borrow_and_update();
                if current
                    .get("publisher")
                    .is_some_and(|ids| ids.contains(&11))
                {
                    break;
                }
            }
            if members.changed().await.is_err() {
                panic!("membership watch ended early");
            }
        }
    })
    .await
    .expect("membership arrives in time");

    client.service_stop().await;
    client.service_await_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_terminates_the_client() {
    let (architect, client) = start_client(test_config()).await;

    architect.send_server_error("client evicted").await;
    tokio::time::timeout(JOIN_BOUND, client.service_await_join())
        .await
        .expect("join after server error");
    assert_eq!(client.state(), ClientState::FailedToConnect);
}

#[tokio::test(flavor = "multi_thread")]
async fn instance_errors_reach_the_registered_handler() {
    let (architect, client) = start_client(test_config()).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    client.register_instance_handler(77, move |notice| {
        if let Some(tx) = tx.lock().expect("handler lock").take() {
            let _ = tx.send(notice);
        }
    });

    architect.send_instance_error(77, "partition wedged").await;
    let notice = tokio::time::timeout(JOIN_BOUND, rx)
        .await
        .expect("instance error in time")
        .expect("handler invoked");
    assert_eq!(notice.instance_id, 77);
    assert_eq!(notice.message, "partition wedged");

    client.service_stop().await;
    client.service_await_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn external_progress_mode_runs_on_the_provided_handle() {
    let config = ClientConfig {
        progress: ProgressMode::External(tokio::runtime::Handle::current()),
        ..test_config()
    };
    let (_architect, client) = start_client(config).await;
    assert_eq!(client.state(), ClientState::Operational);
    client.service_stop().await;
    tokio::time::timeout(JOIN_BOUND, client.service_await_join())
        .await
        .expect("join within bound");
}

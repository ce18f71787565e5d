use super::*;
use crate::{Handler, PushStatus};
use rule_controller_core::policy::service_mapping::{ServiceMapping, ServiceMappingSpec};

const ALLOW_TEST: &str = r#"[{"name":"test","spec":{"action":"allow"}}]"#;

fn ack_status(client: &Client, kind: Kind) -> Option<PushStatus> {
    client
        .handle
        .connection()
        .ack_state(kind)
        .map(|ack| ack.status())
}

#[tokio::test]
async fn pushes_on_subscribe_and_records_ack() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    assert_eq!(storage.connection_count(), 1);
    client.listen(Kind::Authorization);

    let rsp = client.next().await;
    assert_eq!(rsp.kind, Kind::Authorization);
    assert_eq!(rsp.revision, 1);
    assert_eq!(rsp.nonce, "1");
    assert_eq!(rsp.data, ALLOW_TEST);
    assert_eq!(
        ack_status(&client, Kind::Authorization),
        Some(PushStatus::Pushing)
    );

    client.ack(&rsp);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;
    let ack = client
        .handle
        .connection()
        .ack_state(Kind::Authorization)
        .expect("must be listening");
    assert_eq!(ack.acked_revision(), Some(1));
    assert_eq!(ack.pushing_revision(), None);
    assert!(!ack.push_queued());

    // Subscribing to a kind without rules sends nothing.
    client.listen(Kind::TagRoute);
    eventually(|| client.handle.connection().is_listening(Kind::TagRoute)).await;
    client.assert_idle().await;
}

#[tokio::test]
async fn ignores_changes_to_other_kinds() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.listen(Kind::Authorization);
    let rsp = client.next().await;
    client.ack(&rsp);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;

    let mappings = Handler::<ServiceMapping>::new(storage.clone());
    mappings.add(
        "default/greeter",
        ServiceMapping {
            name: "greeter".to_string(),
            spec: Some(ServiceMappingSpec {
                interface_name: "org.example.Greeter".to_string(),
                application_names: vec!["greeter-app".to_string()],
            }),
        },
    );
    assert_eq!(mappings.revision(), 1);

    client.assert_idle().await;
    assert_eq!(client.controls.attempts(), 1);
    assert!(!client.handle.connection().is_listening(Kind::ServiceMapping));
    let ack = client
        .handle
        .connection()
        .ack_state(Kind::Authorization)
        .expect("must be listening");
    assert_eq!(ack.status(), PushStatus::Pushed);
    assert_eq!(ack.acked_revision(), Some(1));
    assert_eq!(ack.last_push_nonce(), Some("1"));
    assert!(!ack.push_queued());
}

#[tokio::test]
async fn pushes_when_rules_are_published_after_subscribe() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());

    let mut client = Client::connect(&storage, mk_endpoint());
    client.listen(Kind::Authorization);
    eventually(|| client.handle.connection().is_listening(Kind::Authorization)).await;
    client.assert_idle().await;

    handler.add("default/test", mk_authz("test", "allow"));
    let rsp = client.next().await;
    assert_eq!(rsp.revision, 1);
    assert_eq!(rsp.data, ALLOW_TEST);
}

#[tokio::test]
async fn coalesces_changes_while_unacknowledged() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.listen(Kind::Authorization);
    let first = client.next().await;
    assert_eq!(first.revision, 1);

    handler.update("default/test", mk_authz("test", "deny"));
    handler.update("default/test", mk_authz("test", "audit"));
    handler.update("default/test", mk_authz("test", "log"));
    assert_eq!(handler.revision(), 4);

    // Nothing is pushed until the outstanding push is acknowledged.
    client.assert_idle().await;
    let ack = client
        .handle
        .connection()
        .ack_state(Kind::Authorization)
        .expect("must be listening");
    assert_eq!(ack.status(), PushStatus::Pushing);
    assert!(ack.push_queued());

    // Acknowledging sends only the latest state.
    client.ack(&first);
    let second = client.next().await;
    assert_eq!(second.revision, 4);
    assert_eq!(second.nonce, "2");
    assert_eq!(
        second.data,
        r#"[{"name":"test","spec":{"action":"log"}}]"#
    );
    client.assert_idle().await;

    client.ack(&second);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;
    assert_eq!(client.handle.connection().pending(), 0);
    client.assert_idle().await;
}

#[tokio::test]
async fn ignores_mismatched_nonce() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.listen(Kind::Authorization);
    let rsp = client.next().await;

    client.request(Ok(ObserveRequest::ack(Kind::Authorization, "bogus")));
    // Requests are processed in order, so once this subscription is visible the
    // bogus acknowledgement has been handled.
    client.listen(Kind::TagRoute);
    eventually(|| client.handle.connection().is_listening(Kind::TagRoute)).await;

    let ack = client
        .handle
        .connection()
        .ack_state(Kind::Authorization)
        .expect("must be listening");
    assert_eq!(ack.status(), PushStatus::Pushing);
    assert_eq!(ack.last_push_nonce(), Some(rsp.nonce.as_str()));

    client.ack(&rsp);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;
}

#[tokio::test]
async fn ignores_unknown_kinds_and_early_acks() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.request(Ok(ObserveRequest {
        nonce: String::new(),
        kind: "unknown/v1".to_string(),
    }));
    client.request(Ok(ObserveRequest::ack(Kind::Authorization, "1")));
    client.listen(Kind::Authorization);

    let rsp = client.next().await;
    assert_eq!(rsp.nonce, "1");
    assert_eq!(
        ack_status(&client, Kind::Authorization),
        Some(PushStatus::Pushing)
    );
    assert_eq!(storage.connection_count(), 1);
}

#[tokio::test]
async fn skips_unchanged_content() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.listen(Kind::Authorization);
    let rsp = client.next().await;
    client.ack(&rsp);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;

    // A policy that doesn't apply to this endpoint bumps the revision without
    // changing what the client sees.
    handler.add("default/prod-only", mk_authz_in_namespace("prod-only", "prod"));
    assert_eq!(handler.revision(), 2);
    client.assert_idle().await;

    let ack = client
        .handle
        .connection()
        .ack_state(Kind::Authorization)
        .expect("must be listening");
    assert_eq!(ack.status(), PushStatus::Pushed);
    assert_eq!(ack.acked_revision(), Some(1));
}

#[tokio::test]
async fn resubscribe_pushes_again() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.listen(Kind::Authorization);
    let rsp = client.next().await;
    client.ack(&rsp);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;

    client.listen(Kind::Authorization);
    let again = client.next().await;
    assert_eq!(again.revision, 1);
    assert_eq!(again.nonce, "2");
    assert_eq!(again.data, ALLOW_TEST);
}

#[tokio::test]
async fn disconnects_on_end_of_stream() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let mut client = Client::connect(&storage, mk_endpoint());
    let id = client.handle.id();
    assert!(storage.connection(id).is_some());

    client.hangup();
    eventually(|| storage.connection_count() == 0).await;
    assert!(storage.connection(id).is_none());
    assert!(client.handle.connection().is_closed());
    assert_eq!(client.controls.disconnects(), 1);

    // The session is gone; closing it again is a no-op.
    assert!(!client.handle.disconnect());
    tokio::time::timeout(time::Duration::from_secs(1), client.handle.closed())
        .await
        .expect("closed must complete");
}

#[tokio::test]
async fn disconnects_on_receive_error() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let client = Client::connect(&storage, mk_endpoint());

    client.request(Err(anyhow::anyhow!("stream reset")));
    eventually(|| storage.connection_count() == 0).await;
    assert_eq!(client.controls.disconnects(), 1);
}

#[tokio::test]
async fn disconnect_forgets_subscriptions() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    let client = Client::connect(&storage, mk_endpoint());
    client.listen(Kind::Authorization);
    eventually(|| client.handle.connection().is_listening(Kind::Authorization)).await;

    assert!(client.handle.disconnect());
    assert!(!client.handle.connection().is_listening(Kind::Authorization));

    // Publishing after the session is closed has no effect on it.
    handler.add("default/test", mk_authz("test", "allow"));
    assert_eq!(client.handle.connection().pending(), 0);
    assert_eq!(client.controls.attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disconnects_close_once() {
    let storage = mk_storage(ConnectionConfig::default());
    let client = Client::connect(&storage, mk_endpoint());

    let tasks = (0..8)
        .map(|_| {
            let handle = client.handle.clone();
            tokio::spawn(async move { handle.disconnect() })
        })
        .collect::<Vec<_>>();
    let mut closed = 0;
    for task in tasks {
        if task.await.expect("task must not panic") {
            closed += 1;
        }
    }

    assert_eq!(closed, 1);
    assert_eq!(storage.connection_count(), 0);
    assert_eq!(client.controls.disconnects(), 1);
}

#[tokio::test]
async fn send_timeout_rolls_back() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig {
        send_timeout: time::Duration::from_millis(50),
        max_send_failures: 3,
    });
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.controls.set_mode(SendMode::Hang);
    client.listen(Kind::Authorization);

    eventually(|| client.controls.attempts() == 1).await;
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Idle)).await;
    let ack = client
        .handle
        .connection()
        .ack_state(Kind::Authorization)
        .expect("must be listening");
    assert_eq!(ack.last_push_nonce(), None);
    assert_eq!(ack.pushing_revision(), None);
    assert_eq!(storage.connection_count(), 1);

    // The next change is pushed once the transport recovers.
    client.controls.set_mode(SendMode::Deliver);
    handler.update("default/test", mk_authz("test", "deny"));
    let rsp = client.next().await;
    assert_eq!(rsp.revision, 2);
    client.ack(&rsp);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;
}

#[tokio::test]
async fn failed_send_keeps_acknowledgement() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig::default());
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let mut client = Client::connect(&storage, mk_endpoint());
    client.controls.set_mode(SendMode::FailAfterDelivery);
    client.listen(Kind::Authorization);

    // The client acknowledges before the transport reports the failure.
    let rsp = client.next().await;
    client.ack(&rsp);
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Pushed)).await;
    client.controls.release.notify_one();

    client.assert_idle().await;
    let ack = client
        .handle
        .connection()
        .ack_state(Kind::Authorization)
        .expect("must be listening");
    assert_eq!(ack.status(), PushStatus::Pushed);
    assert_eq!(ack.acked_revision(), Some(1));
    assert_eq!(ack.last_push_nonce(), Some("1"));
    assert_eq!(client.controls.attempts(), 1);
    assert_eq!(storage.connection_count(), 1);

    client.controls.set_mode(SendMode::Deliver);
    handler.update("default/test", mk_authz("test", "deny"));
    let rsp = client.next().await;
    assert_eq!(rsp.revision, 2);
    assert_eq!(rsp.nonce, "2");
}

#[tokio::test]
async fn repeated_send_failures_disconnect() {
    let _tracing = trace_init();
    let storage = mk_storage(ConnectionConfig {
        send_timeout: time::Duration::from_secs(1),
        max_send_failures: 2,
    });
    let handler = Handler::<Authorization>::new(storage.clone());
    handler.add("default/test", mk_authz("test", "allow"));

    let client = Client::connect(&storage, mk_endpoint());
    client.controls.set_mode(SendMode::Fail);
    client.listen(Kind::Authorization);

    eventually(|| client.controls.attempts() == 1).await;
    eventually(|| ack_status(&client, Kind::Authorization) == Some(PushStatus::Idle)).await;
    assert_eq!(storage.connection_count(), 1);

    handler.update("default/test", mk_authz("test", "deny"));
    eventually(|| storage.connection_count() == 0).await;
    assert_eq!(client.controls.attempts(), 2);
    assert_eq!(client.controls.disconnects(), 1);
}

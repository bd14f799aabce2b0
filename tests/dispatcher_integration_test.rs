mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{failure_body, scripted_client, test_config, Reply, ScriptedTransport};
use serde_json::json;
use xmlsvc::{ExchangeState, FailureKind, Payload, MAX_ROUNDS};

#[tokio::test]
async fn test_one_service_failure_among_many() {
    let transport = Arc::new(
        ScriptedTransport::new().script(
            "GetItem",
            [Reply::Status(200, failure_body("GetItem", "Invalid item"))],
        ),
    );
    let client = scripted_client(test_config(), transport.clone());

    let mut batch = client.dispatcher().batch();
    for verb in ["GetUser", "GetItem", "GetOrders", "GetFeedback", "GeteBayTime"] {
        batch.submit(client.prepare(verb, json!({"Id": 1})));
    }
    batch.drive().await;
    let report = batch.collect();

    assert_eq!(report.success_count(), 4);
    assert_eq!(report.failure_count(), 1);
    assert_eq!(report.rounds(), 1);
    assert_eq!(report.errors().len(), 1);
    assert!(report.errors()[0].starts_with("GetItem: Service: Class: RequestError"));
    assert!(report.errors()[0].contains("Code: 10007"));
    assert_eq!(report.states()[1], ExchangeState::Failed);

    let failed = &report.exchanges()[1];
    assert_eq!(failed.codes(), &[10007]);
    assert_eq!(
        failed.response().unwrap().view().get("Ack").as_str(),
        Some("Failure")
    );
}

#[tokio::test]
async fn test_http_errors_are_terminal() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .script("b", [Reply::Status(500, String::new())])
            .script("d", [Reply::Status(500, "<fault/>".to_string())]),
    );
    let client = scripted_client(test_config(), transport.clone());

    let mut batch = client.dispatcher().batch();
    for verb in ["a", "b", "c", "d", "e"] {
        batch.submit(client.prepare(verb, Payload::Empty));
    }
    batch.drive().await;
    let report = batch.collect();

    assert_eq!(report.success_count(), 3);
    assert_eq!(report.errors().len(), 2);
    assert!(report.errors().iter().all(|entry| entry.contains(": Http: ")));
    assert!(report
        .failures()
        .all(|exchange| exchange.failure().map(|f| f.status) == Some(Some(500))));
    assert_eq!(report.rounds(), 1);
    assert_eq!(transport.calls().len(), 5);
}

#[tokio::test]
async fn test_transport_failure_recovers_in_next_round() {
    let transport = Arc::new(ScriptedTransport::new().script("flaky", [Reply::Refuse]));
    let client = scripted_client(test_config(), transport.clone());

    let mut batch = client.dispatcher().batch();
    let steady = batch.submit(client.prepare("steady", Payload::Empty));
    let flaky = batch.submit(client.prepare("flaky", Payload::Empty));
    batch.drive().await;

    assert_eq!(batch.state(steady), Some(ExchangeState::Completed));
    assert_eq!(batch.state(flaky), Some(ExchangeState::Completed));
    assert!(batch.errors().is_empty());

    let report = batch.collect();
    assert!(report.all_succeeded());
    assert_eq!(report.rounds(), 2);
    assert_eq!(report.exchanges()[flaky].attempts(), 2);
    assert_eq!(transport.calls_for("flaky"), 2);
    assert_eq!(transport.calls_for("steady"), 1);
}

#[tokio::test]
async fn test_transport_failure_gives_up_after_max_rounds() {
    let transport = Arc::new(
        ScriptedTransport::new().script("down", [Reply::Refuse, Reply::Refuse, Reply::Refuse]),
    );
    let client = scripted_client(test_config(), transport.clone());

    let mut batch = client.dispatcher().batch();
    batch.submit(client.prepare("up", Payload::Empty));
    batch.submit(client.prepare("down", Payload::Empty));
    batch.drive().await;
    let report = batch.collect();

    assert_eq!(report.rounds(), MAX_ROUNDS);
    assert_eq!(transport.calls_for("down"), MAX_ROUNDS as usize);
    assert_eq!(
        report.exchanges()[1].failure().map(|f| f.kind),
        Some(FailureKind::Transport)
    );

    let message = report.error().unwrap();
    assert!(message.starts_with("1 of 2 exchanges failed:\n"));
    assert!(message.contains("down: Transport: "));
}

#[tokio::test]
async fn test_stalled_exchange_is_retried_after_round_deadline() {
    let transport = Arc::new(
        ScriptedTransport::new().script("slow", [Reply::Stall(Duration::from_secs(5))]),
    );
    let client = scripted_client(test_config(), transport.clone());

    let mut batch = client.dispatcher().batch();
    batch.submit(client.prepare("fast", Payload::Empty));
    batch.submit(client.prepare("slow", Payload::Empty));
    batch.drive().await;
    let report = batch.collect();

    assert!(report.all_succeeded());
    assert_eq!(report.rounds(), 2);
    assert!(report.elapsed() < Duration::from_secs(5));
    assert_eq!(transport.calls_for("slow"), 2);
}

#[tokio::test]
async fn test_queued_exchanges_keep_their_attempts_across_deadlines() {
    let verbs = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let mut transport = ScriptedTransport::new();
    for verb in verbs {
        transport = transport.script(verb, [Reply::Stall(Duration::from_millis(400))]);
    }
    let transport = Arc::new(transport);

    let mut config = test_config();
    config.dispatch.max_concurrency = 1;
    let client = scripted_client(config, transport.clone());

    let mut batch = client.dispatcher().batch();
    for verb in verbs {
        batch.submit(client.prepare(verb, Payload::Empty));
    }
    batch.drive().await;
    let report = batch.collect();

    // two stalls fit in a one second round; the third is cut off and resent
    assert!(report.all_succeeded());
    assert_eq!(report.rounds(), MAX_ROUNDS);
    for exchange in report.exchanges() {
        assert_eq!(
            exchange.attempts() as usize,
            transport.calls_for(exchange.verb()),
            "attempts for {}",
            exchange.verb()
        );
    }
    assert_eq!(transport.calls_for("c"), 2);
    assert_eq!(transport.calls_for("f"), 2);
    assert_eq!(transport.calls_for("h"), 1);
}

#[tokio::test]
async fn test_mixed_batch_rounds_stay_bounded() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .script("refused", [Reply::Refuse, Reply::Refuse, Reply::Refuse, Reply::Refuse])
            .script("late", [Reply::Refuse, Reply::Refuse])
            .script("broken", [Reply::Status(200, "<a><b></a>".to_string())]),
    );
    let client = scripted_client(test_config(), transport.clone());

    let mut batch = client.dispatcher().batch();
    for verb in ["refused", "late", "broken", "fine"] {
        batch.submit(client.prepare(verb, Payload::Empty));
    }
    batch.drive().await;
    let report = batch.collect();

    assert!(report.rounds() <= MAX_ROUNDS);
    assert!(report.states().iter().all(|state| state.is_terminal()));
    assert_eq!(report.success_count(), 2);

    let kinds: Vec<_> = report
        .failures()
        .map(|exchange| exchange.failure().map(|f| f.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![Some(FailureKind::Transport), Some(FailureKind::Malformed)]
    );

    // completion order: the malformed reply settles in round one
    assert!(report.errors()[0].starts_with("broken: Malformed: "));
    assert!(report.errors()[1].starts_with("refused: Transport: "));
}

#[tokio::test]
async fn test_drive_runs_once() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = scripted_client(test_config(), transport.clone());

    let mut batch = client.dispatcher().batch();
    batch.submit(client.prepare("Ping", Payload::Empty));
    batch.drive().await;
    batch.drive().await;

    assert_eq!(transport.calls_for("Ping"), 1);
    assert_eq!(batch.collect().rounds(), 1);
}

#[tokio::test]
async fn test_empty_batch() {
    let client = scripted_client(test_config(), Arc::new(ScriptedTransport::new()));

    let mut batch = client.dispatcher().batch();
    assert!(batch.is_empty());
    batch.drive().await;
    let report = batch.collect();

    assert_eq!(report.rounds(), 0);
    assert!(report.error().is_none());
}

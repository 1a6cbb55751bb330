use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wfcore::{EventBus, ExecutionEvent, ExecutionLog, ExecutionStatus, NodeEvent};

#[tokio::test]
async fn test_emitter_messages_reach_subscribers() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let execution_id = Uuid::new_v4();

    let emitter = bus.create_emitter(execution_id, "fetch".to_string());
    emitter.info("GET https://example.com");
    emitter.warn("slow response");

    match events.recv().await.unwrap() {
        ExecutionEvent::NodeMessage {
            execution_id: id,
            node_id,
            event: NodeEvent::Info { message },
            ..
        } => {
            assert_eq!(id, execution_id);
            assert_eq!(node_id, "fetch");
            assert_eq!(message, "GET https://example.com");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match events.recv().await.unwrap() {
        ExecutionEvent::NodeMessage {
            event: NodeEvent::Warning { message },
            ..
        } => assert_eq!(message, "slow response"),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_emitting_without_subscribers_is_harmless() {
    let bus = EventBus::new(4);
    bus.emit(ExecutionEvent::Log {
        entry: ExecutionLog::info(Uuid::new_v4(), "n1", "Node n1 started"),
    });

    let emitter = wfcore::EventEmitter::detached("n1");
    emitter.warn("nobody is listening");
}

#[test]
fn test_events_serialize_with_type_tag() {
    let execution_id = Uuid::new_v4();
    let event = ExecutionEvent::StatusChanged {
        execution_id,
        workflow_id: Uuid::new_v4(),
        status: ExecutionStatus::Running,
        timestamp: Utc::now(),
    };

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], json!("StatusChanged"));
    assert_eq!(value["status"], json!("running"));
    assert_eq!(event.execution_id(), execution_id);

    let log = ExecutionEvent::Log {
        entry: ExecutionLog::error(execution_id, "n2", "Node n2 failed: boom")
            .with_metadata(json!({ "error": "boom" })),
    };
    let value = serde_json::to_value(&log).unwrap();
    assert_eq!(value["type"], json!("Log"));
    assert_eq!(value["entry"]["level"], json!("error"));
    assert_eq!(value["entry"]["metadata"]["error"], json!("boom"));
}

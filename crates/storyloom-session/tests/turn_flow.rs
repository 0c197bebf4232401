//! Session controller integration tests — full turns over scripted streams.
//!
//! Run with: `cargo test -p storyloom-session --test turn_flow`

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt as _;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use storyloom_client::event::StreamEvent;
use storyloom_client::transport::{TurnReply, TurnTransport};
use storyloom_core::action::GameAction;
use storyloom_core::state::{GameStateDocument, LogDraft, LogSource};
use storyloom_session::{SessionController, SessionEvent};

/// One scripted reply per `open_turn` call, in order.
enum Script {
    Events(Vec<StreamEvent>),
    /// Events followed by an endless stall (for cancel/timeout tests).
    EventsThenStall(Vec<StreamEvent>),
    Fail(String),
}

struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
        })
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    async fn open_turn(
        &self,
        _input: &str,
        _state: &GameStateDocument,
    ) -> anyhow::Result<TurnReply> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .expect("no script left for this turn");
        match script {
            Script::Events(events) => {
                let items: Vec<anyhow::Result<StreamEvent>> =
                    events.into_iter().map(Ok).collect();
                Ok(TurnReply::Stream(Box::pin(futures::stream::iter(items))))
            }
            Script::EventsThenStall(events) => {
                let items: Vec<anyhow::Result<StreamEvent>> =
                    events.into_iter().map(Ok).collect();
                let stream = futures::stream::iter(items).chain(futures::stream::pending());
                Ok(TurnReply::Stream(Box::pin(stream)))
            }
            Script::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

fn controller_with(
    scripts: Vec<Script>,
    timeout: Duration,
) -> (SessionController, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        ScriptedTransport::new(scripts),
        GameStateDocument::new("village", "Sleepy Village"),
        tx,
        timeout,
    );
    (controller, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn basic_turn_events() -> Vec<StreamEvent> {
    vec![
        StreamEvent::NarrationStart,
        StreamEvent::NarrationChunk {
            text: "You see a door.".into(),
        },
        StreamEvent::NarrationChunk {
            text: " It is locked.".into(),
        },
        StreamEvent::NarrationEnd { effects: vec![] },
    ]
}

#[tokio::test]
async fn test_basic_turn() {
    let (mut controller, mut rx) =
        controller_with(vec![Script::Events(basic_turn_events())], Duration::from_secs(5));

    assert_eq!(controller.document().turn_number, 0);
    let outcome = controller.submit_turn("look around").await.unwrap();

    assert!(outcome.settled());
    assert_eq!(
        outcome.narration.as_deref(),
        Some("You see a door. It is locked.")
    );
    assert_eq!(controller.document().turn_number, 1);

    // Transcript: optimistic player entry, then the finalized narration.
    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 2);
    assert!(matches!(
        &transcript[0],
        storyloom_core::transcript::TranscriptEntry::Player { text, .. } if text == "look around"
    ));
    assert!(matches!(
        &transcript[1],
        storyloom_core::transcript::TranscriptEntry::Narration { text, turn_number, .. }
            if text == "You see a door. It is locked." && *turn_number == 0
    ));

    let events = drain(&mut rx);
    let deltas: Vec<&SessionEvent> = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::NarrationDelta { .. }))
        .collect();
    assert_eq!(deltas.len(), 2);
}

#[tokio::test]
async fn test_item_pickup_applies_effects_as_one_batch() {
    let events = vec![
        StreamEvent::ToolCall {
            id: None,
            name: "give_item".into(),
            input: json!({"item": "torch"}),
        },
        StreamEvent::ToolResult {
            id: None,
            name: Some("give_item".into()),
            output: json!("ok"),
            is_error: false,
            effects: vec![
                GameAction::AddItem {
                    item_id: "torch".into(),
                    name: Some("Torch".into()),
                    quantity: 1,
                },
                GameAction::AddLog {
                    entry: LogDraft {
                        source: LogSource::Narrator,
                        text: "You pick up the torch.".into(),
                    },
                },
            ],
        },
        StreamEvent::NarrationStart,
        StreamEvent::NarrationChunk {
            text: "You pick up the torch.".into(),
        },
        StreamEvent::NarrationEnd { effects: vec![] },
    ];
    let (mut controller, _rx) =
        controller_with(vec![Script::Events(events)], Duration::from_secs(5));
    let mut state_rx = controller.subscribe_state();

    let outcome = controller.submit_turn("take the torch").await.unwrap();
    assert!(outcome.settled());
    assert_eq!(outcome.meta.tool_calls, 1);

    let doc = controller.document();
    let torch = doc.inventory_item("torch").unwrap();
    assert_eq!(torch.quantity, 1);
    assert_eq!(doc.log.len(), 1);
    // Log entry carries the pre-batch turn number.
    assert_eq!(doc.log[0].turn_number, 0);

    // One batch notification plus the commit — never one per action.
    let mut kinds = Vec::new();
    while let Ok(change) = state_rx.try_recv() {
        kinds.push(change.kind);
    }
    assert_eq!(
        kinds,
        vec![
            storyloom_engine::StateChangeKind::BatchApplied,
            storyloom_engine::StateChangeKind::TurnCommitted,
        ]
    );
}

#[tokio::test]
async fn test_rejects_empty_input() {
    let (mut controller, mut rx) = controller_with(vec![], Duration::from_secs(5));
    assert!(controller.submit_turn("   ").await.is_err());
    assert!(controller.transcript().is_empty());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [SessionEvent::Rejected { .. }]
    ));
}

#[tokio::test]
async fn test_cancel_leaves_committed_state_untouched() {
    let events = vec![
        StreamEvent::NarrationStart,
        StreamEvent::NarrationChunk {
            text: "The troll raises".into(),
        },
    ];
    let (mut controller, mut rx) = controller_with(
        vec![Script::EventsThenStall(events)],
        Duration::from_secs(60),
    );

    let before = controller.committed().clone();
    let cancel = controller.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let outcome = controller.submit_turn("attack the troll").await.unwrap();
    assert!(outcome.meta.aborted);
    assert!(outcome.narration.is_none());
    // Deep equality: cancellation must not corrupt committed state.
    assert_eq!(controller.committed(), &before);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SessionEvent::Aborted)));
}

#[tokio::test]
async fn test_stalled_turn_times_out() {
    let (mut controller, mut rx) = controller_with(
        vec![Script::EventsThenStall(vec![StreamEvent::ToolCall {
            id: None,
            name: "slow_lookup".into(),
            input: json!({}),
        }])],
        Duration::from_millis(50),
    );

    let outcome = controller.submit_turn("wait").await.unwrap();
    assert!(outcome.meta.error.is_some());
    assert!(!outcome.meta.aborted);

    let events = drain(&mut rx);
    // The open tool call is surfaced as errored before the stall error.
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::ToolResult { tool, is_error: true, .. } if tool == "slow_lookup"
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Error { kind, .. } if kind == "stalled")));
}

#[tokio::test]
async fn test_backend_error_preserves_input_for_retry() {
    let (mut controller, mut rx) = controller_with(
        vec![
            Script::Events(vec![StreamEvent::Error {
                message: "the archive is on fire".into(),
                code: None,
            }]),
            Script::Events(basic_turn_events()),
        ],
        Duration::from_secs(5),
    );

    let outcome = controller.submit_turn("open the archive").await.unwrap();
    assert!(outcome.meta.error.is_some());
    assert!(controller.last_error().is_some());

    // The transcript is user-facing; retry must not depend on it.
    let outcome = controller.retry().await.unwrap();
    assert!(outcome.settled());
    assert!(controller.last_error().is_none());

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Error { kind, .. } if kind == "backend")));
}

#[tokio::test]
async fn test_transport_failure_is_retryable() {
    let (mut controller, _rx) = controller_with(
        vec![
            Script::Fail("connection refused".into()),
            Script::Events(basic_turn_events()),
        ],
        Duration::from_secs(5),
    );

    let outcome = controller.submit_turn("look").await.unwrap();
    assert!(outcome.meta.error.unwrap().contains("connection refused"));

    let outcome = controller.retry().await.unwrap();
    assert!(outcome.settled());
    assert_eq!(controller.document().turn_number, 1);
}

#[tokio::test]
async fn test_snapshot_is_authoritative() {
    let mut snapshot = GameStateDocument::new("gate", "North Gate");
    snapshot.turn_number = 9;

    let events = vec![
        StreamEvent::NarrationStart,
        StreamEvent::NarrationChunk {
            text: "Reality lurches.".into(),
        },
        StreamEvent::StateUpdate {
            state: Box::new(snapshot.clone()),
        },
        StreamEvent::NarrationEnd { effects: vec![] },
    ];
    let (mut controller, _rx) =
        controller_with(vec![Script::Events(events)], Duration::from_secs(5));

    let outcome = controller.submit_turn("blink").await.unwrap();
    assert!(outcome.settled());
    // Snapshot installed, then the settle committed on top of it.
    assert_eq!(controller.committed().turn_number, 10);
    assert_eq!(controller.committed().map.current_node_id, "gate");
}

#[tokio::test]
async fn test_stream_ending_without_narration_end_discards_partial_text() {
    let (mut controller, _rx) = controller_with(
        vec![Script::Events(vec![
            StreamEvent::NarrationStart,
            StreamEvent::NarrationChunk {
                text: "You almost hear".into(),
            },
        ])],
        Duration::from_secs(5),
    );

    let outcome = controller.submit_turn("listen").await.unwrap();
    assert!(outcome.narration.is_none());
    assert!(outcome.meta.error.is_some());
    // Partial narration must never be presented as complete.
    assert!(!controller
        .transcript()
        .iter()
        .any(|e| matches!(e, storyloom_core::transcript::TranscriptEntry::Narration { .. })));
}

#[tokio::test]
async fn test_non_streaming_reply() {
    struct CompleteTransport;

    #[async_trait]
    impl TurnTransport for CompleteTransport {
        async fn open_turn(
            &self,
            _input: &str,
            _state: &GameStateDocument,
        ) -> anyhow::Result<TurnReply> {
            Ok(TurnReply::Complete(basic_turn_events()))
        }
    }

    let (tx, _rx) = mpsc::unbounded_channel();
    let mut controller = SessionController::new(
        Arc::new(CompleteTransport),
        GameStateDocument::new("village", "Sleepy Village"),
        tx,
        Duration::from_secs(5),
    );

    let outcome = controller.submit_turn("look around").await.unwrap();
    assert!(outcome.settled());
    assert_eq!(controller.document().turn_number, 1);
}

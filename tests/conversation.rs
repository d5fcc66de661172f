mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use agenda::conversation::{Orchestrator, OrchestratorOptions};
use agenda::llm::{Message, ModelBackend, ModelReply};
use agenda::tools::{ToolCatalog, NO_EVENTS};
use agenda::AgendaError;
use common::{call, primary, service, FakeCalendar, InsistentBackend, ScriptedBackend, SlowBackend, LOCAL_TZ};
use serde_json::json;

fn orchestrator<B: ModelBackend>(
    backend: Arc<B>,
    calendar: &Arc<FakeCalendar>,
    max_tool_rounds: u32,
) -> Orchestrator<B, FakeCalendar> {
    Orchestrator::new(
        backend,
        ToolCatalog::new(service(calendar)),
        LOCAL_TZ,
        OrchestratorOptions {
            max_tool_rounds,
            model_timeout: Duration::from_secs(5),
        },
    )
}

#[tokio::test]
async fn day_question_takes_exactly_one_tool_round() {
    let calendar = FakeCalendar::new();
    let backend = ScriptedBackend::new([
        ModelReply::calls(vec![call("call_1", "check_day_hour", json!({ "day": "2025-12-08" }))]),
        ModelReply::text("You have nothing scheduled on 2025-12-08."),
    ]);
    let mut chat = orchestrator(backend.clone(), &calendar, 8);

    let answer = chat.respond("what's on 2025-12-08").await.unwrap();
    assert_eq!(answer, "You have nothing scheduled on 2025-12-08.");
    assert_eq!(backend.calls(), 2);

    let messages = chat.state().messages();
    let roles: Vec<_> = messages.iter().map(Message::role).collect();
    assert_eq!(roles, ["system", "user", "assistant", "tool", "assistant"]);
    assert_eq!(
        messages[3],
        Message::tool_result("call_1", NO_EVENTS),
        "tool result must be correlated with its call id"
    );
}

#[tokio::test]
async fn tool_calls_run_in_the_order_received() {
    let calendar = FakeCalendar::new();
    calendar.add_holiday("2025-12-25", "Christmas");
    let backend = ScriptedBackend::new([
        ModelReply::calls(vec![
            call("a", "is_holiday", json!({ "date": "2025-12-25" })),
            call("b", "create_event", json!({ "summary": "Party", "day": "2025-12-26", "hour": "20:00" })),
            call("c", "check_day_hour", json!({ "day": "2025-12-26" })),
        ]),
        ModelReply::text("Done."),
    ]);
    let mut chat = orchestrator(backend, &calendar, 8);
    chat.respond("set up a party the day after christmas").await.unwrap();

    let tool_ids: Vec<_> = chat
        .state()
        .messages()
        .iter()
        .filter_map(|m| match m {
            | Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            | _ => None,
        })
        .collect();
    assert_eq!(tool_ids, ["a", "b", "c"]);
    // The check saw the event created by the previous call.
    assert!(matches!(
        &chat.state().messages()[5],
        Message::Tool { content, .. } if content.contains("Party")
    ));
    assert_eq!(calendar.events(primary()).len(), 1);
}

#[tokio::test]
async fn history_carries_over_between_turns() {
    let calendar = FakeCalendar::new();
    let backend = ScriptedBackend::new([ModelReply::text("Hi!"), ModelReply::text("Still here.")]);
    let mut chat = orchestrator(backend.clone(), &calendar, 8);

    chat.respond("hello").await.unwrap();
    chat.respond("are you there?").await.unwrap();

    let seen = backend.seen.lock().unwrap();
    let second = &seen[1];
    assert_eq!(second.len(), 4, "system, user, assistant, user");
    assert_eq!(second.iter().filter(|m| m.role() == "system").count(), 1);
    assert_eq!(second[3], Message::user("are you there?"));
}

#[tokio::test]
async fn insistent_model_hits_the_loop_guard() {
    let calendar = FakeCalendar::new();
    let backend = Arc::new(InsistentBackend::default());
    let mut chat = orchestrator(backend.clone(), &calendar, 3);

    let err = chat.respond("keep going").await.unwrap_err();
    assert!(matches!(err, AgendaError::ToolLoopExceeded { rounds: 3 }));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    assert_eq!(calendar.list_calls.load(Ordering::SeqCst), 3);

    // The unanswered request is not kept, so every call in history has a result.
    let messages = chat.state().messages();
    let requested: usize = messages
        .iter()
        .map(|m| match m {
            | Message::Assistant { tool_calls, .. } => tool_calls.len(),
            | _ => 0,
        })
        .sum();
    let answered = messages.iter().filter(|m| m.role() == "tool").count();
    assert_eq!(requested, answered);
}

#[tokio::test]
async fn slow_model_times_out() {
    let calendar = FakeCalendar::new();
    let mut chat = Orchestrator::new(
        Arc::new(SlowBackend),
        ToolCatalog::new(service(&calendar)),
        LOCAL_TZ,
        OrchestratorOptions {
            max_tool_rounds: 8,
            model_timeout: Duration::from_millis(50),
        },
    );
    let err = chat.respond("hello").await.unwrap_err();
    assert!(matches!(err, AgendaError::Timeout { operation: "model call", .. }));
}

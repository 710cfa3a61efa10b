//! End-to-end tests for the message dispatch pipeline.

mod common;

use std::time::Duration;

use llmrelay::gateway::reply::{
    DELIVERY_FAILED, EMPTY_APOLOGY, ERROR_APOLOGY, MESSAGE_LIMIT, PLACEHOLDER_FAILED,
    SESSION_APOLOGY, THINKING, TRUNCATION_MARKER,
};
use llmrelay::gateway::{Delivery, Dispatch, DispatchConfig, IgnoreReason};

use common::{
    CHANNEL, Failures, GUILD, Script, ScriptedProvider, Sent, bot, harness, harness_with, message,
    message_in,
};

fn paris() -> ScriptedProvider {
    ScriptedProvider::new(Script::Reply("Paris".to_string()))
}

async fn delivered(dispatch: Dispatch) -> Delivery {
    match dispatch {
        Dispatch::Spawned(job) => job.await.unwrap(),
        other => panic!("expected a spawned reply job, got {other:?}"),
    }
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn routed_message_edits_placeholder_with_reply() {
    let h = harness(paris(), Failures::default()).await;
    let msg = message("U1", "What is the capital of France?");
    let msg_id = msg.message_id.clone();

    let delivery = delivered(h.dispatcher.handle_message(&bot(), msg).await).await;

    assert_eq!(delivery, Delivery::Edited);
    assert_eq!(
        h.transport.sent(),
        vec![
            Sent::Typing {
                channel_id: CHANNEL.to_string()
            },
            Sent::Reply {
                to: msg_id,
                content: THINKING.to_string()
            },
            Sent::Edit {
                message_id: "M1".to_string(),
                content: "Paris".to_string()
            },
        ]
    );
    assert_eq!(h.provider.received(), vec!["What is the capital of France?"]);
}

#[tokio::test]
async fn message_text_is_trimmed_before_sending() {
    let h = harness(paris(), Failures::default()).await;

    let dispatch = h.dispatcher.handle_message(&bot(), message("U1", "  hi there \n")).await;
    delivered(dispatch).await;

    assert_eq!(h.provider.received(), vec!["hi there"]);
}

#[tokio::test]
async fn new_conversation_gets_system_instruction() {
    let h = harness(paris(), Failures::default()).await;

    delivered(h.dispatcher.handle_message(&bot(), message("U1", "hi")).await).await;

    let prompts = h.provider.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    let prompt = prompts[0].as_deref().unwrap();
    assert!(prompt.contains("Your name is Relay."));
    assert!(prompt.contains("3800 characters"));
}

#[tokio::test]
async fn conversation_is_reused_per_user() {
    let h = harness(paris(), Failures::default()).await;

    for (author, text) in [("U1", "one"), ("U1", "two"), ("U2", "three")] {
        delivered(h.dispatcher.handle_message(&bot(), message(author, text)).await).await;
    }

    assert_eq!(h.provider.created(), 2);
    assert_eq!(h.transport.edits(), vec!["Paris", "Paris", "Paris"]);
}

#[tokio::test]
async fn long_reply_is_truncated() {
    let long = "word ".repeat(2000);
    let h = harness(ScriptedProvider::new(Script::Reply(long)), Failures::default()).await;

    delivered(h.dispatcher.handle_message(&bot(), message("U1", "essay")).await).await;

    let edits = h.transport.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].chars().count(), MESSAGE_LIMIT);
    assert!(edits[0].ends_with(TRUNCATION_MARKER));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_messages_are_all_answered() {
    let h = harness(
        ScriptedProvider::new(Script::Delayed("ok".to_string(), Duration::from_millis(20))),
        Failures::default(),
    )
    .await;

    let mut jobs = Vec::new();
    for i in 0..10 {
        let author = format!("U{}", i % 3);
        jobs.push(h.dispatcher.handle_message(&bot(), message(&author, "ping")).await);
    }
    for job in jobs {
        assert_eq!(delivered(job).await, Delivery::Edited);
    }

    assert_eq!(h.transport.edits().len(), 10);
    assert_eq!(h.provider.created(), 3);
}

#[tokio::test(start_paused = true)]
async fn later_reply_from_same_user_may_land_first() {
    let h = harness(
        ScriptedProvider::new(Script::Echo(vec![
            ("slow".to_string(), Duration::from_secs(1)),
            ("fast".to_string(), Duration::from_millis(10)),
        ])),
        Failures::default(),
    )
    .await;

    let slow = h.dispatcher.handle_message(&bot(), message("U1", "slow")).await;
    let fast = h.dispatcher.handle_message(&bot(), message("U1", "fast")).await;
    assert_eq!(delivered(slow).await, Delivery::Edited);
    assert_eq!(delivered(fast).await, Delivery::Edited);

    // Each reply replaces its own placeholder, in completion order.
    let edits: Vec<(String, String)> = h
        .transport
        .sent()
        .into_iter()
        .filter_map(|sent| match sent {
            Sent::Edit {
                message_id,
                content,
            } => Some((message_id, content)),
            _ => None,
        })
        .collect();
    assert_eq!(
        edits,
        vec![
            ("M2".to_string(), "fast".to_string()),
            ("M1".to_string(), "slow".to_string()),
        ]
    );
    assert_eq!(h.provider.created(), 1);
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn unrouted_guild_gets_no_response() {
    let h = harness(paris(), Failures::default()).await;

    let dispatch = h
        .dispatcher
        .handle_message(&bot(), message_in(Some("G2"), CHANNEL, "U1", "hello"))
        .await;

    assert!(matches!(dispatch, Dispatch::Ignored(IgnoreReason::NoRoute)));
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.provider.created(), 0);
}

#[tokio::test]
async fn messages_outside_the_llm_channel_are_ignored() {
    let h = harness(paris(), Failures::default()).await;

    let cases = [
        (message_in(Some(GUILD), "C2", "U1", "hello"), IgnoreReason::OtherChannel),
        (message_in(None, CHANNEL, "U1", "hello"), IgnoreReason::DirectMessage),
        (message("B0", "my own words"), IgnoreReason::OwnMessage),
        (message("U1", "   "), IgnoreReason::EmptyContent),
    ];

    for (msg, expected) in cases {
        match h.dispatcher.handle_message(&bot(), msg).await {
            Dispatch::Ignored(reason) => assert_eq!(reason, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn route_changes_apply_to_next_message() {
    let h = harness(paris(), Failures::default()).await;

    h.store.set(GUILD, "C9").await.unwrap();
    let dispatch = h.dispatcher.handle_message(&bot(), message("U1", "hi")).await;
    assert!(matches!(dispatch, Dispatch::Ignored(IgnoreReason::OtherChannel)));

    h.store.remove(GUILD).await.unwrap();
    let dispatch = h
        .dispatcher
        .handle_message(&bot(), message_in(Some(GUILD), "C9", "U1", "hi"))
        .await;
    assert!(matches!(dispatch, Dispatch::Ignored(IgnoreReason::NoRoute)));
}

// ============================================================================
// Backend Failures
// ============================================================================

#[tokio::test]
async fn backend_error_becomes_apology() {
    let h = harness(ScriptedProvider::new(Script::Fail), Failures::default()).await;

    let delivery = delivered(h.dispatcher.handle_message(&bot(), message("U1", "hi")).await).await;

    assert_eq!(delivery, Delivery::Edited);
    assert_eq!(h.transport.edits(), vec![ERROR_APOLOGY]);
}

#[tokio::test]
async fn empty_response_becomes_empty_apology() {
    let h = harness(ScriptedProvider::new(Script::Empty), Failures::default()).await;

    delivered(h.dispatcher.handle_message(&bot(), message("U1", "hi")).await).await;

    assert_eq!(h.transport.edits(), vec![EMPTY_APOLOGY]);
}

#[tokio::test]
async fn blank_reply_becomes_empty_apology() {
    let h = harness(
        ScriptedProvider::new(Script::Reply(" \n ".to_string())),
        Failures::default(),
    )
    .await;

    delivered(h.dispatcher.handle_message(&bot(), message("U1", "hi")).await).await;

    assert_eq!(h.transport.edits(), vec![EMPTY_APOLOGY]);
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out_into_apology() {
    let config = DispatchConfig {
        request_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let h = harness_with(
        ScriptedProvider::new(Script::Delayed("late".to_string(), Duration::from_secs(60))),
        Failures::default(),
        config,
    )
    .await;

    delivered(h.dispatcher.handle_message(&bot(), message("U1", "hi")).await).await;

    assert_eq!(h.transport.edits(), vec![ERROR_APOLOGY]);
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_limits_backend_calls() {
    let config = DispatchConfig {
        max_concurrent_replies: 1,
        ..Default::default()
    };
    let h = harness_with(
        ScriptedProvider::new(Script::Delayed("ok".to_string(), Duration::from_secs(1))),
        Failures::default(),
        config,
    )
    .await;

    let mut jobs = Vec::new();
    for author in ["U1", "U2", "U3"] {
        jobs.push(h.dispatcher.handle_message(&bot(), message(author, "hi")).await);
    }
    // Every placeholder is posted before any reply completes.
    let placeholders = h
        .transport
        .sent()
        .into_iter()
        .filter(|sent| matches!(sent, Sent::Reply { content, .. } if content == THINKING))
        .count();
    assert_eq!(placeholders, 3);

    for job in jobs {
        delivered(job).await;
    }
    assert_eq!(h.transport.edits().len(), 3);
    assert_eq!(
        h.provider
            .max_in_flight
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn session_creation_failure_sends_apology() {
    let h = harness(ScriptedProvider::failing_creation(), Failures::default()).await;
    let msg = message("U1", "hi");
    let msg_id = msg.message_id.clone();

    let dispatch = h.dispatcher.handle_message(&bot(), msg).await;

    assert!(matches!(dispatch, Dispatch::Aborted));
    assert_eq!(
        h.transport.sent(),
        vec![Sent::Reply {
            to: msg_id,
            content: SESSION_APOLOGY.to_string()
        }]
    );
}

// ============================================================================
// Delivery Fallbacks
// ============================================================================

#[tokio::test]
async fn typing_failure_is_not_fatal() {
    let failures = Failures {
        typing: true,
        ..Default::default()
    };
    let h = harness(paris(), failures).await;

    let delivery = delivered(h.dispatcher.handle_message(&bot(), message("U1", "hi")).await).await;

    assert_eq!(delivery, Delivery::Edited);
    assert_eq!(h.transport.edits(), vec!["Paris"]);
}

#[tokio::test]
async fn placeholder_failure_aborts_without_backend_call() {
    let failures = Failures {
        placeholder: true,
        ..Default::default()
    };
    let h = harness(paris(), failures).await;

    let dispatch = h.dispatcher.handle_message(&bot(), message("U1", "hi")).await;

    assert!(matches!(dispatch, Dispatch::Aborted));
    assert!(h.provider.received().is_empty());
    assert_eq!(
        h.transport.sent().last(),
        Some(&Sent::Message {
            channel_id: CHANNEL.to_string(),
            content: PLACEHOLDER_FAILED.to_string()
        })
    );
}

#[tokio::test]
async fn edit_failure_falls_back_to_new_reply() {
    let failures = Failures {
        edits: true,
        ..Default::default()
    };
    let h = harness(paris(), failures).await;
    let msg = message("U1", "hi");
    let msg_id = msg.message_id.clone();

    let delivery = delivered(h.dispatcher.handle_message(&bot(), msg).await).await;

    assert_eq!(delivery, Delivery::Replied);
    assert_eq!(
        h.transport.sent().last(),
        Some(&Sent::Reply {
            to: msg_id,
            content: "Paris".to_string()
        })
    );
}

#[tokio::test]
async fn edit_and_reply_failure_sends_one_notice() {
    let failures = Failures {
        edits: true,
        replies: true,
        ..Default::default()
    };
    let h = harness(paris(), failures).await;
    let msg = message("U1", "hi");
    let msg_id = msg.message_id.clone();

    let delivery = delivered(h.dispatcher.handle_message(&bot(), msg).await).await;

    assert_eq!(delivery, Delivery::Notified);
    let notices: Vec<_> = h
        .transport
        .sent()
        .into_iter()
        .filter(|sent| matches!(sent, Sent::Reply { content, .. } if content == DELIVERY_FAILED))
        .collect();
    assert_eq!(
        notices,
        vec![Sent::Reply {
            to: msg_id,
            content: DELIVERY_FAILED.to_string()
        }]
    );
}

#[tokio::test]
async fn total_delivery_failure_is_reported() {
    let failures = Failures {
        edits: true,
        replies: true,
        notices: true,
        ..Default::default()
    };
    let h = harness(paris(), failures).await;

    let delivery = delivered(h.dispatcher.handle_message(&bot(), message("U1", "hi")).await).await;

    assert_eq!(delivery, Delivery::Failed);
}

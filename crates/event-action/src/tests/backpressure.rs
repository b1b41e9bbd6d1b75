//! In-flight accounting and the backpressure signal.

use super::harness::{action_config, scripted_action, settle, Completions, ScriptedSink};
use crate::config::ErrorHandling;
use crate::ActionStatus;
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_in_flight_counts_open_queued_and_processing() {
    let sink = ScriptedSink::slow(Duration::from_secs(10));
    let action = scripted_action(action_config(2, None, ErrorHandling::Skip), &sink);
    let completions = Completions::new();

    // Batch 1 processing, batch 2 queued, one event in an open batch
    for n in 0..5 {
        action.submit(completions.event("s1", json!(n))).await.unwrap();
    }
    settle().await;
    assert_eq!(
        action.status(),
        ActionStatus {
            in_flight: 5,
            queued_batches: 1,
            batches_started: 1,
            stopped: false,
            drained: false,
        }
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(action.in_flight(), 3);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(action.in_flight(), 1);
    assert_eq!(action.status().queued_batches, 0);
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_tracks_batch_size() {
    let sink = ScriptedSink::slow(Duration::from_secs(5));
    let action = scripted_action(action_config(3, None, ErrorHandling::Skip), &sink);
    let completions = Completions::new();

    assert!(!action.is_backpressured());
    action.submit(completions.event("s1", json!(1))).await.unwrap();
    action.submit(completions.event("s1", json!(2))).await.unwrap();
    settle().await;
    assert!(!action.is_backpressured());

    action.submit(completions.event("s1", json!(3))).await.unwrap();
    settle().await;
    assert!(action.is_backpressured());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!action.is_backpressured());
}

#[tokio::test(start_paused = true)]
async fn test_block_policy_keeps_backpressure_engaged() {
    let sink = ScriptedSink::failing();
    let action = scripted_action(action_config(2, None, ErrorHandling::Block), &sink);
    let completions = Completions::new();

    action.submit(completions.event("s1", json!(1))).await.unwrap();
    action.submit(completions.event("s2", json!(2))).await.unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(action.is_backpressured());
        assert_eq!(action.in_flight(), 2);
    }
    assert_eq!(completions.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_submit_still_accepted_while_backpressured() {
    let sink = ScriptedSink::failing();
    let action = scripted_action(action_config(1, None, ErrorHandling::Block), &sink);
    let completions = Completions::new();

    action.submit(completions.event("s1", json!(1))).await.unwrap();
    settle().await;
    assert!(action.is_backpressured());

    // Advisory only: the handoff keeps accepting events
    for n in 2..6 {
        action.submit(completions.event("s1", json!(n))).await.unwrap();
    }
    settle().await;
    assert_eq!(action.in_flight(), 5);
    assert_eq!(action.status().queued_batches, 4);
}

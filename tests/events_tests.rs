//! Integration tests for the Event Publisher.
//!
//! Tests cover ordering under concurrent publishers, independent
//! subscribers, and resuming a subscription from the log.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use aiwrite_tasks::events::EventPublisher;
use aiwrite_tasks::{Event, EventDraft, EventType};

fn draft(n: usize) -> EventDraft {
    EventDraft {
        event_type: EventType::ProgressUpdated,
        payload: json!({ "n": n }),
    }
}

async fn collect(stream: &mut aiwrite_tasks::EventStream, count: usize) -> Vec<Event> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        match tokio::time::timeout(Duration::from_secs(2), stream.next()).await {
            Ok(Some(event)) => out.push(event),
            _ => break,
        }
    }
    out
}

mod ordering_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn concurrent_publishers_get_gapless_sequences() {
        let publisher = Arc::new(EventPublisher::new(1024));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let publisher = publisher.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..25 {
                    publisher.publish("P1", draft(worker * 100 + n));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let sequences: Vec<u64> = publisher
            .events_since("P1", 1)
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, (1..=200).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn live_subscriber_sees_strictly_increasing_sequences() {
        let publisher = Arc::new(EventPublisher::new(1024));
        let mut stream = publisher.subscribe("P1", 1);

        let mut handles = Vec::new();
        for worker in 0..4 {
            let publisher = publisher.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..10 {
                    publisher.publish("P1", draft(worker * 10 + n));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let events = collect(&mut stream, 40).await;
        assert_eq!(events.len(), 40);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let publisher = EventPublisher::new(16);
        let mut p1 = publisher.subscribe("P1", 1);
        publisher.publish("P2", draft(0));
        publisher.publish("P1", draft(1));

        let events = collect(&mut p1, 1).await;
        assert_eq!(events[0].scope_id, "P1");
        assert_eq!(events[0].sequence, 1);
    }
}

mod subscription_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn every_subscriber_receives_every_event() {
        let publisher = EventPublisher::new(16);
        let mut first = publisher.subscribe("P1", 1);
        let mut second = publisher.subscribe("P1", 1);

        for n in 0..3 {
            publisher.publish("P1", draft(n));
        }

        let a: Vec<u64> = collect(&mut first, 3).await.iter().map(|e| e.sequence).collect();
        let b: Vec<u64> = collect(&mut second, 3).await.iter().map(|e| e.sequence).collect();
        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(b, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reconnecting_observer_resumes_from_last_seen() {
        let publisher = EventPublisher::new(16);
        let mut stream = publisher.subscribe("P1", 1);
        publisher.publish("P1", draft(0));
        publisher.publish("P1", draft(1));
        let seen = collect(&mut stream, 2).await;
        let last_seen = seen.last().map(|e| e.sequence).unwrap();
        drop(stream);

        // Published while nobody was listening.
        publisher.publish("P1", draft(2));
        publisher.publish("P1", draft(3));

        let mut resumed = publisher.subscribe("P1", last_seen + 1);
        publisher.publish("P1", draft(4));
        let sequences: Vec<u64> = collect(&mut resumed, 3)
            .await
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn subscribing_past_the_end_waits_for_new_events() {
        let publisher = EventPublisher::new(16);
        publisher.publish("P1", draft(0));
        let mut stream = publisher.subscribe("P1", 2);

        let nothing = tokio::time::timeout(Duration::from_millis(30), stream.next()).await;
        assert!(nothing.is_err());

        publisher.publish("P1", draft(1));
        let events = collect(&mut stream, 1).await;
        assert_eq!(events[0].sequence, 2);
    }
}

//! # Request Flow Tests
//!
//! Request / will / did coordination on a real tokio runtime:
//!
//! ```text
//! [Requester] ──saveRequest──→ [Event Bus] ──→ [Responders]
//!                                  ↑                │
//!                                  │   willSave     │  (announce)
//!                                  ├────────────────┤
//!                                  │   didSave      │  (answer)
//!                                  └────────────────┘
//! ```
//!
//! ## Test Categories
//!
//! 1. **Happy Path**: same-cycle and delayed answers
//! 2. **Timeout Handling**: silent announced responders
//! 3. **Error Recovery**: faulty responders, malformed requests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use event_bus::{
        BusConfig, BusError, EventBus, Handler, PublishOptions, RequestOptions, SubscribeOptions,
    };
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    use crate::init_test_tracing;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SaveResult {
        document: String,
        revision: u32,
    }

    fn tokio_bus() -> EventBus {
        init_test_tracing();
        EventBus::from_current_runtime(BusConfig::default()).unwrap()
    }

    fn capture_incidents(bus: &EventBus) -> Arc<Mutex<Vec<(String, Value)>>> {
        let incidents = Arc::new(Mutex::new(Vec::new()));
        let sink = incidents.clone();
        bus.set_error_handler(move |message, context| {
            sink.lock().push((message.to_string(), context.clone()));
        });
        incidents
    }

    /// Responder that announces itself and answers after `delay`.
    fn delayed_responder(bus: &EventBus, name: &'static str, delay: Duration) -> Handler {
        let responder_bus = bus.clone();
        Handler::new(move |delivery| {
            responder_bus.publish("willSave", (), PublishOptions::from_sender(name))?;
            let document: String = delivery.payload.decode()?;
            let answer_bus = responder_bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let result = SaveResult {
                    document,
                    revision: 2,
                };
                let _ = answer_bus.publish("didSave", result, PublishOptions::from_sender(name));
            });
            Ok(())
        })
    }

    // =============================================================================
    // HAPPY PATH
    // =============================================================================

    /// Test: Nobody listening resolves with no replies and no fault
    #[tokio::test(start_paused = true)]
    async fn test_request_without_responders_resolves_empty() {
        let bus = tokio_bus();
        let incidents = capture_incidents(&bus);

        let replies = bus
            .publish_and_gather_replies("doSomethingRequest", (), RequestOptions::default())
            .unwrap()
            .await
            .unwrap();

        assert!(replies.is_empty());
        assert!(incidents.lock().is_empty());
        assert_eq!(bus.subscriber_count(), 0, "Session handlers must be removed");
    }

    /// Test: A same-cycle answer is collected
    #[tokio::test(start_paused = true)]
    async fn test_same_cycle_answer() {
        let bus = tokio_bus();
        let responder_bus = bus.clone();
        let responder = Handler::new(move |_| {
            responder_bus.publish("didX", json!({"from": "A"}), PublishOptions::from_sender("A"))?;
            Ok(())
        });
        bus.subscribe("xRequest", &responder, SubscribeOptions::from_subscriber("A"))
            .unwrap();

        let replies = bus
            .publish_and_gather_replies("xRequest", (), RequestOptions::from_sender("caller"))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].event, json!({"from": "A"}));
        assert_eq!(replies[0].meta.sender.as_deref(), Some("A"));
        assert_eq!(replies[0].meta.initiator.as_deref(), Some("caller"));
    }

    /// Test: The request waits for every announced responder
    #[tokio::test(start_paused = true)]
    async fn test_waits_for_all_announced_responders() {
        let bus = tokio_bus();
        let fast = delayed_responder(&bus, "fast", Duration::from_millis(10));
        let slow = delayed_responder(&bus, "slow", Duration::from_millis(500));
        bus.subscribe("saveRequest", &fast, SubscribeOptions::default())
            .unwrap();
        bus.subscribe("saveRequest", &slow, SubscribeOptions::default())
            .unwrap();

        let started = tokio::time::Instant::now();
        let replies = bus
            .publish_and_gather_replies("saveRequest", "notes.txt", RequestOptions::default())
            .unwrap()
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(500));
        let mut senders: Vec<_> = replies
            .iter()
            .filter_map(|reply| reply.meta.sender.clone())
            .collect();
        senders.sort();
        assert_eq!(senders, vec!["fast", "slow"]);

        let result: SaveResult = serde_json::from_value(replies[0].event.clone()).unwrap();
        assert_eq!(result.document, "notes.txt");
        assert_eq!(bus.stats().requests_fulfilled, 1);
    }

    /// Test: A qualified request reaches unqualified responders
    #[tokio::test(start_paused = true)]
    async fn test_qualified_request_topics() {
        let bus = tokio_bus();
        let responder_bus = bus.clone();
        let responder = Handler::new(move |delivery| {
            assert_eq!(delivery.topic(), "loadRequest.page");
            responder_bus.publish("didLoad.page", "home", PublishOptions::from_sender("router"))?;
            Ok(())
        });
        bus.subscribe("loadRequest", &responder, SubscribeOptions::default())
            .unwrap();

        let replies = bus
            .publish_and_gather_replies("loadRequest.page", (), RequestOptions::default())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].meta.topic, "didLoad.page");
    }

    // =============================================================================
    // TIMEOUT HANDLING
    // =============================================================================

    /// Test: A silent announced responder times the request out
    #[tokio::test(start_paused = true)]
    async fn test_silent_responder_times_out() {
        let bus = tokio_bus();
        let incidents = capture_incidents(&bus);
        let responder_bus = bus.clone();
        let responder = Handler::new(move |_| {
            responder_bus.publish("willX", (), PublishOptions::from_sender("B"))?;
            Ok(())
        });
        bus.subscribe("xRequest", &responder, SubscribeOptions::default())
            .unwrap();

        let started = tokio::time::Instant::now();
        let outcome = bus
            .publish_and_gather_replies(
                "xRequest",
                (),
                RequestOptions::default().timeout(Duration::from_millis(50)),
            )
            .unwrap()
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
        let err = outcome.unwrap_err();
        assert!(err.partial_replies().is_empty());
        match err {
            BusError::RequestTimeout { missing, .. } => assert_eq!(missing, vec!["B"]),
            other => panic!("Expected RequestTimeout, got {:?}", other),
        }

        let incidents = incidents.lock();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].1["missing"], json!(["B"]));
        assert_eq!(bus.stats().requests_timed_out, 1);
    }

    /// Test: A timeout keeps the replies that did arrive
    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_partial_replies() {
        let config = BusConfig::default().with_pending_did_timeout(Duration::from_millis(100));
        init_test_tracing();
        let bus = EventBus::from_current_runtime(config).unwrap();
        let _incidents = capture_incidents(&bus);

        let fast = delayed_responder(&bus, "fast", Duration::from_millis(10));
        let slow = delayed_responder(&bus, "slow", Duration::from_secs(10));
        bus.subscribe("saveRequest", &fast, SubscribeOptions::default())
            .unwrap();
        bus.subscribe("saveRequest", &slow, SubscribeOptions::default())
            .unwrap();

        let err = bus
            .publish_and_gather_replies("saveRequest", "draft", RequestOptions::default())
            .unwrap()
            .await
            .unwrap_err();

        let partial = err.partial_replies();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].meta.sender.as_deref(), Some("fast"));
    }

    // =============================================================================
    // ERROR RECOVERY
    // =============================================================================

    /// Test: A faulty responder does not prevent the others from answering
    #[tokio::test(start_paused = true)]
    async fn test_faulty_responder_is_isolated() {
        let bus = tokio_bus();
        let incidents = capture_incidents(&bus);

        let faulty = Handler::new(|_| anyhow::bail!("disk full"));
        let responder_bus = bus.clone();
        let healthy = Handler::new(move |_| {
            responder_bus.publish("didSave", "ok", PublishOptions::from_sender("healthy"))?;
            Ok(())
        });
        bus.subscribe("saveRequest", &faulty, SubscribeOptions::default())
            .unwrap();
        bus.subscribe("saveRequest", &healthy, SubscribeOptions::default())
            .unwrap();

        let replies = bus
            .publish_and_gather_replies("saveRequest", (), RequestOptions::default())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(replies.len(), 1);
        let incidents = incidents.lock();
        assert_eq!(incidents.len(), 1);
        assert!(incidents[0].1["error"].as_str().unwrap().contains("disk full"));
    }

    /// Test: Malformed request topics are rejected at the call site
    #[tokio::test]
    async fn test_malformed_request_topics() {
        let bus = tokio_bus();
        for topic in ["save", "Request", "saveRequest..doc", "save request"] {
            assert!(
                matches!(
                    bus.publish_and_gather_replies(topic, (), RequestOptions::default()),
                    Err(BusError::InvalidArgument(_))
                ),
                "{topic} should be rejected"
            );
        }
        assert_eq!(bus.pending_events(), 0);
    }
}

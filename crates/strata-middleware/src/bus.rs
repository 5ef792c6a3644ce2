//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the publisher.  A slow subscriber lags and loses events; it can never
//! stall the pipeline that publishes them.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Frames`] | One event per finalised frame: detections + smoothed layers |
//! | [`Topic::Diagnostics`] | Run lifecycle: run finished, cancellation |

use strata_types::{Event, StrataError};
use tokio::sync::broadcast;
use tracing::debug;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 1024;

/// Routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-frame read-only views published after a sample is assembled.
    Frames,
    /// Run lifecycle notifications.
    Diagnostics,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    frames: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity);
        let (diagnostics, _) = broadcast::channel(capacity);
        Self {
            frames,
            diagnostics,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`StrataError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, StrataError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| StrataError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// True when at least one receiver is subscribed to `topic`.
    ///
    /// Publishers use this to skip building events nobody will read.
    pub fn has_subscribers(&self, topic: Topic) -> bool {
        self.topic_sender(topic).receiver_count() > 0
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        debug!(?topic, "subscriber attached");
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Frames => &self.frames,
            Topic::Diagnostics => &self.diagnostics,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::{EventPayload, RunSummary};

    fn make_event(frames: u64) -> Event {
        Event::new(
            "strata-middleware::test",
            EventPayload::RunFinished(RunSummary {
                frames,
                cancelled: false,
            }),
        )
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::Frames);
        let mut subscriber2 = bus.subscribe_to(Topic::Frames);

        let event = make_event(1);
        assert_eq!(bus.publish_to(Topic::Frames, event.clone())?, 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);
        let _frames = bus.subscribe_to(Topic::Frames);

        bus.publish_to(Topic::Frames, make_event(2))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), diagnostics.recv()).await;
        assert!(
            result.is_err(),
            "Diagnostics subscriber must not receive a Frames event"
        );
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        assert!(!bus.has_subscribers(Topic::Frames));
        let result = bus.publish_to(Topic::Frames, make_event(0));
        assert!(matches!(result, Err(StrataError::Channel(_))));
    }

    #[test]
    fn has_subscribers_tracks_receivers() {
        let bus = EventBus::default();
        let rx = bus.subscribe_to(Topic::Frames);
        assert!(bus.has_subscribers(Topic::Frames));
        assert!(!bus.has_subscribers(Topic::Diagnostics));
        assert_eq!(rx.topic(), Topic::Frames);
        drop(rx);
        assert!(!bus.has_subscribers(Topic::Frames));
    }

    #[tokio::test]
    async fn slow_receiver_sees_lag_then_close() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Frames);
        for i in 0..16 {
            let _ = bus.publish_to(Topic::Frames, make_event(i));
        }
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(12))
        ));
        let first = slow.recv().await.expect("an event after lag");
        match first.payload {
            EventPayload::RunFinished(summary) => assert_eq!(summary.frames, 12),
            other => panic!("unexpected payload: {other:?}"),
        }
        drop(bus);
        let mut remaining = 0;
        while slow.recv().await.is_ok() {
            remaining += 1;
        }
        assert_eq!(remaining, 3);
    }
}

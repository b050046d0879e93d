// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

//! Events published by SMTP sessions. The channel is the only side channel
//! out of a session; consumers must tolerate interleaved events from
//! distinct sessions.

use pelican_deps::tokio::sync::mpsc;

/// An event observed on a session's event channel, ordered by occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A message was accepted by the upstream service.
    MessageSent {
        /// The owning user.
        user_id: String,
        /// The address the message was sent from.
        address_id: String,
        /// The server-assigned message id.
        message_id: String,
    },
    /// The session discarded its in-progress envelope.
    Reset {
        /// The owning user.
        user_id: String,
    },
    /// The session ended.
    Logout {
        /// The owning user.
        user_id: String,
    },
    /// An address keyring holds no usable key; upper layers may re-prompt
    /// for authentication.
    KeyUnusable {
        /// The owning user.
        user_id: String,
        /// The address whose keyring is unusable.
        address_id: String,
    },
}

/// The publishing half of a session event channel.
///
/// The session publishes but does not own its consumer; publishing to a
/// dropped consumer is a no-op.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventChannel {
    /// Creates a channel, returning the publisher and the consumer half.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publishes an event. Events are delivered in publish order.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_order_is_preserved() {
        let (ch, mut rx) = EventChannel::new();
        ch.publish(Event::Reset {
            user_id: "u1".into(),
        });
        ch.publish(Event::Logout {
            user_id: "u1".into(),
        });

        assert_eq!(
            rx.try_recv().expect("first event"),
            Event::Reset {
                user_id: "u1".into()
            }
        );
        assert_eq!(
            rx.try_recv().expect("second event"),
            Event::Logout {
                user_id: "u1".into()
            }
        );
    }

    #[test]
    fn publish_without_consumer_is_a_noop() {
        let (ch, rx) = EventChannel::new();
        drop(rx);
        ch.publish(Event::Reset {
            user_id: "u1".into(),
        });
    }
}

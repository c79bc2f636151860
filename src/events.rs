//! Input events forwarded from connected clients to the host, and the bounded queue
//! that carries them.

use std::collections::VecDeque;
use std::sync::Mutex;

/// An input event translated from a client's wire message.
///
/// Mirrors the original's `trfb_event_t` tagged union: `Key` and `Pointer` are
/// plain-data variants, while `CutText` owns a string buffer that moves out of the
/// queue on [`EventQueue::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A key press or release.
    Key {
        /// `true` if the key is pressed, `false` if released.
        down: bool,
        /// X11-style keysym identifying the key.
        keysym: u32,
    },
    /// A pointer (mouse) movement or button-state change.
    Pointer {
        /// Bitmask of currently pressed buttons.
        button_mask: u8,
        /// X coordinate.
        x: u16,
        /// Y coordinate.
        y: u16,
    },
    /// Clipboard text sent by the client.
    CutText {
        /// The clipboard contents.
        text: String,
    },
}

/// Maximum number of events the queue holds before new events are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 128;

/// A bounded FIFO of [`InputEvent`]s, shared between every connection (producers) and
/// the host (the single consumer).
///
/// Overflow policy is newest-drop: once the queue holds [`EVENT_QUEUE_CAPACITY`]
/// entries, `push` silently discards the incoming event rather than evicting an older
/// one. This is a documented choice (spec.md left the policy unspecified); it bounds
/// the latency of events already queued at the cost of losing the most recent input
/// during a sustained overflow.
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<InputEvent>>,
}

impl EventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(EVENT_QUEUE_CAPACITY)),
        }
    }

    /// Enqueues `event`, dropping it if the queue is already full.
    ///
    /// Returns `true` if the event was enqueued, `false` if it was dropped.
    pub fn push(&self, event: InputEvent) -> bool {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= EVENT_QUEUE_CAPACITY {
            return false;
        }
        queue.push_back(event);
        true
    }

    /// Removes and returns the oldest queued event, or `None` if the queue is empty.
    pub fn poll(&self) -> Option<InputEvent> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Number of events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// `true` if no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_empty_queue_returns_none() {
        let queue = EventQueue::new();
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = EventQueue::new();
        queue.push(InputEvent::Key { down: true, keysym: 0x61 });
        queue.push(InputEvent::Pointer { button_mask: 1, x: 10, y: 20 });

        assert_eq!(queue.poll(), Some(InputEvent::Key { down: true, keysym: 0x61 }));
        assert_eq!(
            queue.poll(),
            Some(InputEvent::Pointer { button_mask: 1, x: 10, y: 20 })
        );
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn overflow_drops_newest_event() {
        let queue = EventQueue::new();
        for i in 0..EVENT_QUEUE_CAPACITY {
            assert!(queue.push(InputEvent::Key { down: true, keysym: i as u32 }));
        }
        assert_eq!(queue.len(), EVENT_QUEUE_CAPACITY);

        // Queue is full: this one is dropped, not the oldest.
        assert!(!queue.push(InputEvent::Key { down: true, keysym: 9999 }));
        assert_eq!(queue.len(), EVENT_QUEUE_CAPACITY);

        // The first entry polled is still keysym 0 (oldest survives).
        assert_eq!(queue.poll(), Some(InputEvent::Key { down: true, keysym: 0 }));
    }

    #[test]
    fn cut_text_ownership_transfers_on_poll() {
        let queue = EventQueue::new();
        queue.push(InputEvent::CutText { text: "hello".to_string() });

        let event = queue.poll().unwrap();
        match event {
            InputEvent::CutText { text } => assert_eq!(text, "hello"),
            _ => panic!("expected CutText"),
        }
        assert_eq!(queue.poll(), None);
    }
}

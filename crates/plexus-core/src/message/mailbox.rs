//! Bounded per-module mailbox.
//!
//! Delivery is FIFO. When the mailbox is full, the oldest pending entry is
//! dropped to make room for the new one. Dropping an entry drops its reply
//! sender, so a caller waiting on it never receives a response.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use plexus_types::{Message, Response};
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;

/// Channel used by the recipient to answer a point-to-point command.
pub type ReplySender = oneshot::Sender<Response>;

/// A message waiting in a mailbox, plus the reply channel when the sender
/// is blocked on an answer.
#[derive(Debug)]
pub struct MailboxEntry {
    pub message: Message,
    reply: Option<ReplySender>,
}

impl MailboxEntry {
    /// An entry nobody waits on (broadcasts, events, fire-and-forget commands).
    pub fn new(message: Message) -> Self {
        Self {
            message,
            reply: None,
        }
    }

    pub fn with_reply(message: Message, reply: ReplySender) -> Self {
        Self {
            message,
            reply: Some(reply),
        }
    }

    /// Whether a sender is waiting for a response.
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub fn into_parts(self) -> (Message, Option<ReplySender>) {
        (self.message, self.reply)
    }
}

/// Bounded, ordered queue of pending entries for one module.
#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<VecDeque<MailboxEntry>>,
    /// Wakes the (single) puller when an entry is enqueued.
    available: Notify,
    capacity: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            available: Notify::new(),
            capacity,
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<MailboxEntry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an entry, returning the oldest entry if it had to be evicted.
    pub fn push(&self, entry: MailboxEntry) -> Option<MailboxEntry> {
        let evicted = {
            let mut queue = self.queue();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(entry);
            evicted
        };
        self.available.notify_one();
        evicted
    }

    /// Remove the oldest entry without waiting.
    pub fn try_pop(&self) -> Option<MailboxEntry> {
        self.queue().pop_front()
    }

    /// Remove the oldest entry, waiting up to `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<MailboxEntry> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }
            // notify_one stores a permit when nobody is waiting, so a push
            // racing with the check above still wakes us.
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_types::Command;

    fn entry(n: u64) -> MailboxEntry {
        MailboxEntry::new(Command::new("n", "test").param("n", n).into())
    }

    fn number(entry: &MailboxEntry) -> u64 {
        match &entry.message {
            Message::Command(c) => c.params["n"].as_u64().unwrap(),
            Message::Event(_) => panic!("expected a command"),
        }
    }

    #[test]
    fn fifo_order() {
        let mailbox = Mailbox::new(10);
        for n in 0..5 {
            assert!(mailbox.push(entry(n)).is_none());
        }
        assert_eq!(mailbox.len(), 5);
        for n in 0..5 {
            assert_eq!(number(&mailbox.try_pop().unwrap()), n);
        }
        assert!(mailbox.try_pop().is_none());
        assert!(mailbox.is_empty());
    }

    #[test]
    fn full_mailbox_drops_oldest() {
        let mailbox = Mailbox::new(3);
        for n in 0..3 {
            mailbox.push(entry(n));
        }
        let evicted = mailbox.push(entry(3)).expect("oldest entry evicted");
        assert_eq!(number(&evicted), 0);
        assert_eq!(mailbox.len(), 3);
        assert_eq!(number(&mailbox.try_pop().unwrap()), 1);
    }

    #[test]
    fn evicting_entry_closes_its_reply_channel() {
        let mailbox = Mailbox::new(1);
        let (tx, mut rx) = oneshot::channel();
        mailbox.push(MailboxEntry::with_reply(
            Command::new("a", "test").into(),
            tx,
        ));
        drop(mailbox.push(entry(1)));
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mailbox = Mailbox::new(0);
        assert_eq!(mailbox.capacity(), 1);
        mailbox.push(entry(1));
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn pop_timeout_returns_none_when_empty() {
        let mailbox = Mailbox::new(4);
        let started = Instant::now();
        assert!(mailbox.pop_timeout(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn pop_timeout_wakes_on_push() {
        let mailbox = std::sync::Arc::new(Mailbox::new(4));
        let producer = std::sync::Arc::clone(&mailbox);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(entry(7));
        });
        let popped = mailbox.pop_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(number(&popped), 7);
    }
}

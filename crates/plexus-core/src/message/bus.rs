//! In-process message bus connecting every module actor.
//!
//! The `MessageBus` owns one bounded [`Mailbox`] per subscribed module plus
//! the activity table used for idle eviction. `push` is the single entry point
//! for sending: it routes a message directly, fans it out to the long-poll UI
//! clients, broadcasts it, or (while the host is still starting) buffers it
//! for a module that has not subscribed yet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use plexus_types::config::BusConfig;
use plexus_types::{BusError, Message, ModuleId, Response};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::mailbox::{Mailbox, MailboxEntry};
use crate::lifecycle::PhaseTracker;

/// Central hub for module-to-module communication.
///
/// Delivery modes, tried in order by [`MessageBus::push`]:
/// - **Direct:** the recipient is subscribed; optionally wait for its reply.
/// - **RPC fan-out:** `to == "rpc"`; copied to every `rpc-*` subscriber.
/// - **Broadcast:** no recipient; copied to every subscriber except the sender.
/// - **Buffered:** unknown recipient before RUN; held until it subscribes.
pub struct MessageBus {
    mailboxes: DashMap<ModuleId, Arc<Mailbox>>,
    /// Mailboxes created by buffered delivery, adopted on subscription.
    pending: DashMap<ModuleId, Arc<Mailbox>>,
    /// Last pull per subscribed module.
    activity: DashMap<ModuleId, Instant>,
    phase: PhaseTracker,
    configured: AtomicBool,
    config: BusConfig,
}

impl MessageBus {
    pub fn new(config: BusConfig, phase: PhaseTracker) -> Self {
        Self {
            mailboxes: DashMap::new(),
            pending: DashMap::new(),
            activity: DashMap::new(),
            phase,
            configured: AtomicBool::new(false),
            config,
        }
    }

    /// Allow `push`. Called by the loader once the host is configured and
    /// about to instantiate modules.
    pub fn app_configured(&self) {
        if !self.configured.swap(true, Ordering::SeqCst) {
            debug!("message bus accepting messages");
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> &PhaseTracker {
        &self.phase
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Create the mailbox of `id`.
    ///
    /// A mailbox buffered for `id` during bootstrap is adopted with its
    /// pending messages. Subscribing an id twice replaces its mailbox and
    /// loses whatever was queued in it.
    pub fn add_subscription(&self, id: impl Into<ModuleId>) {
        let id = id.into();
        // The pending entry stays locked until the mailbox is published, so a
        // concurrent buffered push either lands in the adopted mailbox or
        // sees the subscription.
        match self.pending.entry(id.clone()) {
            Entry::Occupied(pending) => {
                let mailbox = Arc::clone(pending.get());
                debug!(module = %id, queued = mailbox.len(), "adopting buffered mailbox");
                self.mailboxes.insert(id.clone(), mailbox);
                pending.remove();
            }
            Entry::Vacant(_) => {
                let mailbox = Arc::new(Mailbox::new(self.config.mailbox_capacity));
                if self.mailboxes.insert(id.clone(), mailbox).is_some() {
                    warn!(module = %id, "module subscribed twice, pending messages dropped");
                }
            }
        }
        self.activity.insert(id.clone(), Instant::now());
        debug!(module = %id, "subscribed to message bus");
    }

    /// Delete the mailbox and activity entry of `id`.
    pub fn remove_subscription(&self, id: &ModuleId) -> Result<(), BusError> {
        self.activity.remove(id);
        match self.mailboxes.remove(id) {
            Some(_) => {
                debug!(module = %id, "unsubscribed from message bus");
                Ok(())
            }
            None => Err(BusError::InvalidModule(id.clone())),
        }
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.mailboxes.contains_key(id)
    }

    /// Ids of every subscribed module, sorted.
    pub fn subscriptions(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.mailboxes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of queued entries for `id`, if subscribed.
    pub fn mailbox_len(&self, id: &str) -> Option<usize> {
        self.mailboxes.get(id).map(|mailbox| mailbox.len())
    }

    fn mailbox(&self, id: &str) -> Option<Arc<Mailbox>> {
        self.mailboxes.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Send a message.
    ///
    /// A command sent to a single module with a non-zero `timeout` waits for
    /// the recipient's reply and returns it, or fails with
    /// [`BusError::NoResponse`] once `timeout` elapses. Everything else
    /// (events, broadcasts, RPC fan-out, zero timeout) returns `Ok(None)` as
    /// soon as the message is enqueued.
    pub async fn push(
        &self,
        message: impl Into<Message>,
        timeout: Duration,
    ) -> Result<Option<Response>, BusError> {
        if !self.is_configured() {
            return Err(BusError::NotReady);
        }
        let message = message.into();

        let Some(to) = message.to().cloned() else {
            self.broadcast(message);
            return Ok(None);
        };

        if let Some(mailbox) = self.mailbox(&to) {
            return self.deliver(&to, &mailbox, message, timeout).await;
        }
        if to.is_rpc_fanout() {
            self.fan_out_rpc(message);
            return Ok(None);
        }
        if self.phase.is_before_run() {
            return self.deliver_buffered(to, message, timeout).await;
        }
        Err(BusError::InvalidModule(to))
    }

    /// Enqueue into a known mailbox and wait for the reply when one is expected.
    async fn deliver(
        &self,
        to: &ModuleId,
        mailbox: &Mailbox,
        message: Message,
        timeout: Duration,
    ) -> Result<Option<Response>, BusError> {
        if !message.is_command() || timeout.is_zero() {
            self.enqueue(to, mailbox, MailboxEntry::new(message));
            return Ok(None);
        }

        let deadline = Instant::now() + timeout;
        let request = message.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(to, mailbox, MailboxEntry::with_reply(message, reply_tx));

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) => {
                // Entry evicted or dropped unanswered: the caller still waits
                // out its own timeout.
                debug!(module = %to, command = request.name(), "request dropped before reply");
                tokio::time::sleep_until(deadline).await;
                Err(no_response(to, timeout, request))
            }
            Err(_) => Err(no_response(to, timeout, request)),
        }
    }

    fn enqueue(&self, to: &ModuleId, mailbox: &Mailbox, entry: MailboxEntry) {
        debug!(module = %to, message = entry.message.name(), "message enqueued");
        if let Some(evicted) = mailbox.push(entry) {
            warn!(
                module = %to,
                dropped = evicted.message.name(),
                awaited = evicted.expects_reply(),
                "mailbox full, oldest message dropped"
            );
        }
    }

    fn broadcast(&self, message: Message) {
        let sender = message.sender().clone();
        let copy = message.as_broadcast();
        for (id, mailbox) in self.targets(|id| *id != sender) {
            self.enqueue(&id, &mailbox, MailboxEntry::new(copy.clone()));
        }
    }

    fn fan_out_rpc(&self, message: Message) {
        for (id, mailbox) in self.targets(ModuleId::is_rpc_client) {
            self.enqueue(&id, &mailbox, MailboxEntry::new(message.clone()));
        }
    }

    /// Snapshot of the mailboxes matching `filter`, taken before enqueueing
    /// so no map shard stays locked while pushing.
    fn targets(&self, filter: impl Fn(&ModuleId) -> bool) -> Vec<(ModuleId, Arc<Mailbox>)> {
        self.mailboxes
            .iter()
            .filter(|e| filter(e.key()))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Hold a message for a module that has not subscribed yet.
    ///
    /// A reply-expecting command waits for the fixed buffered timeout instead
    /// of the one the caller asked for.
    async fn deliver_buffered(
        &self,
        to: ModuleId,
        message: Message,
        timeout: Duration,
    ) -> Result<Option<Response>, BusError> {
        let mailbox = match self.pending.entry(to.clone()) {
            Entry::Occupied(pending) => Arc::clone(pending.get()),
            Entry::Vacant(vacant) => match self.mailbox(&to) {
                // Subscribed between the direct lookup and here.
                Some(mailbox) => mailbox,
                None => {
                    let mailbox = Arc::new(Mailbox::new(self.config.mailbox_capacity));
                    vacant.insert(Arc::clone(&mailbox));
                    mailbox
                }
            },
        };

        let timeout = if timeout.is_zero() {
            timeout
        } else {
            self.config.buffered_timeout()
        };
        debug!(module = %to, message = message.name(), "buffering message for unsubscribed module");
        self.deliver(&to, &mailbox, message, timeout).await
    }

    /// Take the oldest entry queued for `id`.
    ///
    /// A zero `timeout` makes a single attempt. Every call refreshes the
    /// caller's activity timestamp, hit or miss.
    pub async fn pull(&self, id: &ModuleId, timeout: Duration) -> Result<MailboxEntry, BusError> {
        let mailbox = self
            .mailbox(id)
            .ok_or_else(|| BusError::InvalidModule(id.clone()))?;
        if let Some(mut last) = self.activity.get_mut(id) {
            *last = Instant::now();
        }

        let entry = if timeout.is_zero() {
            mailbox.try_pop()
        } else {
            mailbox.pop_timeout(timeout).await
        };
        entry.ok_or_else(|| BusError::NoMessageAvailable {
            module: id.clone(),
            timeout,
        })
    }

    /// Remove every subscription idle for longer than the configured idle
    /// timeout. Once the host runs, buffered mailboxes nobody adopted are
    /// dropped too.
    ///
    /// Returns the purged module ids.
    pub fn purge_subscriptions(&self) -> Vec<ModuleId> {
        let idle_timeout = self.config.idle_timeout();
        let now = Instant::now();
        let stale: Vec<ModuleId> = self
            .activity
            .iter()
            .filter(|e| now.duration_since(*e.value()) > idle_timeout)
            .map(|e| e.key().clone())
            .collect();

        let mut purged = Vec::with_capacity(stale.len());
        for id in stale {
            if self.remove_subscription(&id).is_ok() {
                info!(module = %id, "purged idle subscription");
                purged.push(id);
            }
        }

        if !self.phase.is_before_run() && !self.pending.is_empty() {
            let orphans: Vec<ModuleId> = self.pending.iter().map(|e| e.key().clone()).collect();
            for id in orphans {
                self.pending.remove(&id);
                warn!(module = %id, "dropped messages buffered for a module that never subscribed");
            }
        }
        purged
    }

    /// Run [`purge_subscriptions`](Self::purge_subscriptions) periodically
    /// until `cancel` fires.
    pub fn spawn_purge_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        let period = self.config.purge_interval().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = bus.purge_subscriptions();
                        if !purged.is_empty() {
                            debug!(count = purged.len(), "purge pass finished");
                        }
                    }
                }
            }
            debug!("purge task stopped");
        })
    }
}

fn no_response(to: &ModuleId, timeout: Duration, request: Message) -> BusError {
    BusError::NoResponse {
        to: to.clone(),
        timeout,
        request: Box::new(request),
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscriptions", &self.mailboxes.len())
            .field("pending", &self.pending.len())
            .field("phase", &self.phase.current())
            .field("configured", &self.is_configured())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_types::{Command, Event, ExecutionStep};
    use serde_json::json;

    fn bus_with(config: BusConfig) -> Arc<MessageBus> {
        let bus = Arc::new(MessageBus::new(config, PhaseTracker::new()));
        bus.app_configured();
        bus
    }

    fn bus() -> Arc<MessageBus> {
        bus_with(BusConfig::default())
    }

    fn running_bus() -> Arc<MessageBus> {
        let bus = bus();
        bus.phase().advance(ExecutionStep::Run);
        bus
    }

    /// Answer the next command queued for `id` with its own name.
    fn spawn_responder(bus: &Arc<MessageBus>, id: &str) -> JoinHandle<()> {
        let bus = Arc::clone(bus);
        let id = ModuleId::from(id);
        tokio::spawn(async move {
            let entry = bus.pull(&id, Duration::from_secs(60)).await.unwrap();
            let (message, reply) = entry.into_parts();
            reply
                .expect("reply channel")
                .send(Response::ok(json!({ "echo": message.name() })))
                .unwrap();
        })
    }

    #[tokio::test]
    async fn push_before_configured_is_not_ready() {
        let bus = MessageBus::new(BusConfig::default(), PhaseTracker::new());
        bus.add_subscription("audio");
        let err = bus
            .push(Command::new("ping", "ui").to("audio"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotReady));
    }

    #[tokio::test]
    async fn direct_request_returns_reply() {
        let bus = running_bus();
        bus.add_subscription("audio");
        let responder = spawn_responder(&bus, "audio");

        let response = bus
            .push(Command::new("get_volume", "ui").to("audio"), Duration::from_secs(5))
            .await
            .unwrap()
            .expect("reply");
        assert_eq!(response.data["echo"], "get_volume");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn zero_timeout_is_fire_and_forget() {
        let bus = running_bus();
        bus.add_subscription("audio");
        let result = bus
            .push(Command::new("mute", "ui").to("audio"), Duration::ZERO)
            .await
            .unwrap();
        assert!(result.is_none());

        let entry = bus.pull(&ModuleId::from("audio"), Duration::ZERO).await.unwrap();
        assert!(!entry.expects_reply());
    }

    #[tokio::test]
    async fn point_event_never_waits() {
        let bus = running_bus();
        bus.add_subscription("audio");
        let result = bus
            .push(Event::new("volume.changed", "ui").to("audio"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(bus.mailbox_len("audio"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let bus = running_bus();
        bus.add_subscription("audio");
        let started = Instant::now();
        let err = bus
            .push(Command::new("get_volume", "ui").to("audio"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(2));
        match err {
            BusError::NoResponse { to, timeout, request } => {
                assert_eq!(to, "audio");
                assert_eq!(timeout, Duration::from_secs(2));
                assert_eq!(request.name(), "get_volume");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pull_returns_entries_in_push_order() {
        let bus = running_bus();
        bus.add_subscription("audio");
        for n in 0..10 {
            bus.push(
                Command::new("step", "ui").to("audio").param("n", n),
                Duration::ZERO,
            )
            .await
            .unwrap();
        }
        let id = ModuleId::from("audio");
        for n in 0..10 {
            let entry = bus.pull(&id, Duration::ZERO).await.unwrap();
            match entry.message {
                Message::Command(c) => assert_eq!(c.params["n"], n),
                Message::Event(_) => panic!("expected a command"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_request_waits_out_its_own_timeout() {
        let bus = bus_with(BusConfig {
            mailbox_capacity: 2,
            ..BusConfig::default()
        });
        bus.phase().advance(ExecutionStep::Run);
        bus.add_subscription("audio");

        let waiter_bus = Arc::clone(&bus);
        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let result = waiter_bus
                .push(Command::new("first", "ui").to("audio"), Duration::from_secs(5))
                .await;
            (result, started.elapsed())
        });
        while bus.mailbox_len("audio") != Some(1) {
            tokio::task::yield_now().await;
        }

        for name in ["second", "third"] {
            bus.push(Command::new(name, "ui").to("audio"), Duration::ZERO)
                .await
                .unwrap();
        }
        assert_eq!(bus.mailbox_len("audio"), Some(2));

        let (result, elapsed) = waiter.await.unwrap();
        assert!(matches!(result, Err(BusError::NoResponse { .. })));
        assert!(elapsed >= Duration::from_secs(5));

        let entry = bus.pull(&ModuleId::from("audio"), Duration::ZERO).await.unwrap();
        assert_eq!(entry.message.name(), "second");
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let bus = running_bus();
        for id in ["audio", "network", "ui"] {
            bus.add_subscription(id);
        }
        let result = bus
            .push(Command::new("reload", "ui"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_none());

        assert_eq!(bus.mailbox_len("ui"), Some(0));
        for id in ["audio", "network"] {
            let entry = bus.pull(&ModuleId::from(id), Duration::ZERO).await.unwrap();
            assert!(!entry.expects_reply());
            assert!(matches!(entry.message, Message::Command(c) if c.broadcast));
        }
    }

    #[tokio::test]
    async fn broadcast_event_skips_sender() {
        let bus = running_bus();
        bus.add_subscription("network");
        bus.add_subscription("audio");
        bus.push(Event::new("network.up", "network"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(bus.mailbox_len("network"), Some(0));
        assert_eq!(bus.mailbox_len("audio"), Some(1));
    }

    #[tokio::test]
    async fn rpc_recipient_fans_out_to_clients() {
        let bus = running_bus();
        for id in ["rpc-1", "rpc-2", "audio"] {
            bus.add_subscription(id);
        }
        let result = bus
            .push(
                Command::new("show", "audio").to(plexus_types::id::RPC_RECIPIENT),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(bus.mailbox_len("rpc-1"), Some(1));
        assert_eq!(bus.mailbox_len("rpc-2"), Some(1));
        assert_eq!(bus.mailbox_len("audio"), Some(0));
    }

    #[tokio::test]
    async fn unknown_recipient_after_run_is_invalid() {
        let bus = running_bus();
        let err = bus
            .push(Command::new("ping", "ui").to("ghost"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidModule(id) if id == "ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_request_answered_after_late_subscription() {
        let bus = bus();
        bus.phase().advance(ExecutionStep::Init);

        let waiter_bus = Arc::clone(&bus);
        let waiter = tokio::spawn(async move {
            waiter_bus
                .push(Command::new("get_state", "ui").to("late"), Duration::from_secs(1))
                .await
        });

        // Well past the requested timeout, still within the buffered one.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!waiter.is_finished());

        bus.add_subscription("late");
        assert_eq!(bus.mailbox_len("late"), Some(1));
        spawn_responder(&bus, "late").await.unwrap();

        let response = waiter.await.unwrap().unwrap().expect("reply");
        assert_eq!(response.data["echo"], "get_state");
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_request_times_out_after_fixed_delay() {
        let bus = bus();
        bus.phase().advance(ExecutionStep::Config);
        let started = Instant::now();
        let err = bus
            .push(Command::new("get_state", "ui").to("never"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(matches!(err, BusError::NoResponse { timeout, .. } if timeout == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn buffered_fire_and_forget_survives_subscription() {
        let bus = bus();
        bus.push(Event::new("boot.progress", "system").to("ui"), Duration::ZERO)
            .await
            .unwrap();
        assert!(!bus.is_subscribed("ui"));

        bus.add_subscription("ui");
        let entry = bus.pull(&ModuleId::from("ui"), Duration::ZERO).await.unwrap();
        assert_eq!(entry.message.name(), "boot.progress");
    }

    #[tokio::test]
    async fn subscription_lifecycle() {
        let bus = bus();
        let id = ModuleId::from("audio");
        bus.add_subscription(id.clone());
        assert!(bus.is_subscribed("audio"));
        assert_eq!(bus.subscriptions(), vec![id.clone()]);

        bus.remove_subscription(&id).unwrap();
        assert!(!bus.is_subscribed("audio"));
        assert!(matches!(
            bus.remove_subscription(&id),
            Err(BusError::InvalidModule(_))
        ));
    }

    #[tokio::test]
    async fn second_subscription_replaces_mailbox() {
        let bus = running_bus();
        bus.add_subscription("audio");
        bus.push(Command::new("mute", "ui").to("audio"), Duration::ZERO)
            .await
            .unwrap();
        bus.add_subscription("audio");
        assert_eq!(bus.mailbox_len("audio"), Some(0));
    }

    #[tokio::test]
    async fn pull_errors() {
        let bus = bus();
        let ghost = ModuleId::from("ghost");
        assert!(matches!(
            bus.pull(&ghost, Duration::ZERO).await,
            Err(BusError::InvalidModule(_))
        ));

        bus.add_subscription("audio");
        let err = bus
            .pull(&ModuleId::from("audio"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoMessageAvailable { .. }));
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_idle_subscriptions_only() {
        let bus = bus();
        bus.add_subscription("idle");
        bus.add_subscription("busy");

        tokio::time::advance(Duration::from_secs(601)).await;
        // a miss still counts as activity
        let _ = bus.pull(&ModuleId::from("busy"), Duration::ZERO).await;

        let purged = bus.purge_subscriptions();
        assert_eq!(purged, vec![ModuleId::from("idle")]);
        assert!(!bus.is_subscribed("idle"));
        assert!(bus.is_subscribed("busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_orphaned_buffers_once_running() {
        let bus = bus();
        bus.push(Event::new("hello", "ui").to("never"), Duration::ZERO)
            .await
            .unwrap();
        bus.purge_subscriptions();
        bus.phase().advance(ExecutionStep::Run);
        bus.purge_subscriptions();

        // a later subscription starts empty
        bus.add_subscription("never");
        assert_eq!(bus.mailbox_len("never"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_task_runs_until_cancelled() {
        let bus = bus();
        bus.add_subscription("idle");
        let cancel = CancellationToken::new();
        let task = bus.spawn_purge_task(cancel.clone());

        tokio::time::sleep(Duration::from_secs(700)).await;
        assert!(!bus.is_subscribed("idle"));

        cancel.cancel();
        task.await.unwrap();
    }
}

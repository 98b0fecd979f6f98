use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, instrument, trace, warn};

use super::{QueueError, QueueResult};
use crate::bus::{BusMessage, BusResult, Listener, MessageMatcher};

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub received_at: Instant,
    pub received_wall: DateTime<Utc>,
    pub message: BusMessage,
}

/// Bounded, time-limited FIFO of bus messages shared by concurrent waiters.
///
/// Overflow drops the oldest entry. Entries older than `life_expectancy` are
/// never returned and are discarded when a scan reaches them. Waiters remove
/// only entries matching their own [`MessageMatcher`].
pub struct CorrelatedQueue {
    name: String,
    max_size: usize,
    life_expectancy: Duration,
    entries: Mutex<VecDeque<QueueEntry>>,
    arrivals: Notify,
}

impl CorrelatedQueue {
    pub fn new(name: impl Into<String>, max_size: usize, life_expectancy: Duration) -> Self {
        Self {
            name: name.into(),
            max_size,
            life_expectancy,
            entries: Mutex::new(VecDeque::with_capacity(max_size)),
            arrivals: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn life_expectancy(&self) -> Duration {
        self.life_expectancy
    }

    /// Physical length, expired entries included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empty queue with the same name and limits, owned by a single waiter.
    pub fn inbox(&self) -> Self {
        Self::new(self.name.as_str(), self.max_size, self.life_expectancy)
    }

    pub fn enqueue(&self, message: BusMessage) {
        {
            let now = Instant::now();
            let mut entries = self.lock();
            while entries
                .front()
                .is_some_and(|entry| self.is_expired(entry, now))
            {
                entries.pop_front();
            }
            entries.push_back(QueueEntry {
                received_at: now,
                received_wall: Utc::now(),
                message,
            });
            while entries.len() > self.max_size {
                entries.pop_front();
                warn!(
                    queue = %self.name,
                    max_size = self.max_size,
                    "Queue full, dropped oldest entry"
                );
            }
        }
        self.arrivals.notify_waiters();
    }

    /// Waits for the first entry matching `matcher`, removing and returning it.
    #[instrument(level = "debug", skip(self, matcher), fields(queue = %self.name))]
    pub async fn wait_one(
        &self,
        matcher: &MessageMatcher,
        timeout: Duration,
    ) -> QueueResult<BusMessage> {
        self.wait_entry(matcher, Instant::now() + timeout, None)
            .await
            .map(|entry| entry.message)
            .ok_or_else(|| self.timeout_error(timeout))
    }

    /// Waits up to `first_timeout` for a first match, then keeps collecting
    /// matches that arrive within `window` of that first arrival.
    #[instrument(level = "debug", skip(self, matcher), fields(queue = %self.name))]
    pub async fn wait_many(
        &self,
        matcher: &MessageMatcher,
        first_timeout: Duration,
        window: Duration,
    ) -> QueueResult<Vec<BusMessage>> {
        let first = self
            .wait_entry(matcher, Instant::now() + first_timeout, None)
            .await
            .ok_or_else(|| self.timeout_error(first_timeout))?;

        let window_end = first.received_at + window;
        let mut collected = vec![first.message];
        while let Some(entry) = self
            .wait_entry(matcher, window_end, Some(window_end))
            .await
        {
            collected.push(entry.message);
        }
        debug!(collected = collected.len(), "Aggregation window closed");
        Ok(collected)
    }

    /// Copy of the live entries, oldest first. Nothing is removed.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|entry| !self.is_expired(entry, now))
            .cloned()
            .collect()
    }

    /// Removes every entry and returns the live ones, oldest first.
    pub fn drain(&self) -> Vec<BusMessage> {
        let now = Instant::now();
        let drained: Vec<QueueEntry> = self.lock().drain(..).collect();
        drained
            .into_iter()
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.message)
            .collect()
    }

    async fn wait_entry(
        &self,
        matcher: &MessageMatcher,
        deadline: Instant,
        arrived_by: Option<Instant>,
    ) -> Option<QueueEntry> {
        loop {
            // Registered before scanning so an enqueue between scan and await still wakes us.
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.take_match(matcher, arrived_by) {
                return Some(entry);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    fn take_match(
        &self,
        matcher: &MessageMatcher,
        arrived_by: Option<Instant>,
    ) -> Option<QueueEntry> {
        let now = Instant::now();
        let mut entries = self.lock();
        let mut index = 0;
        while index < entries.len() {
            let entry = &entries[index];
            if self.is_expired(entry, now) {
                trace!(queue = %self.name, "Discarding expired entry");
                entries.remove(index);
                continue;
            }
            let in_window = arrived_by.is_none_or(|limit| entry.received_at <= limit);
            if in_window && matcher.matches(&entry.message) {
                return entries.remove(index);
            }
            index += 1;
        }
        None
    }

    fn is_expired(&self, entry: &QueueEntry, now: Instant) -> bool {
        now.duration_since(entry.received_at) > self.life_expectancy
    }

    fn timeout_error(&self, timeout: Duration) -> QueueError {
        QueueError::Timeout {
            queue: self.name.clone(),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A queue is itself the write target of the listeners feeding it.
impl Listener for CorrelatedQueue {
    fn on_message(&self, message: &BusMessage) -> BusResult<()> {
        self.enqueue(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{FieldFilter, MessageKind};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn plugin_reply(command: &str, plugin: &str) -> BusMessage {
        BusMessage::builder(MessageKind::Trigger, "domogik.system")
            .source("domogik-manager.darkstar")
            .field("command", command)
            .field("plugin", plugin)
            .build()
    }

    fn matcher_for(plugin: &str) -> MessageMatcher {
        MessageMatcher::new(MessageKind::Trigger, "domogik.system")
            .with_filter(FieldFilter::new().with("plugin", plugin))
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = CorrelatedQueue::new("system_list", 3, Duration::from_secs(5));
        for i in 0..5 {
            queue.enqueue(plugin_reply("list", &format!("p{}", i)));
        }
        let plugins: Vec<String> = queue
            .snapshot()
            .iter()
            .map(|entry| entry.message.field("plugin").unwrap().to_string())
            .collect();
        assert_eq!(plugins, vec!["p2", "p3", "p4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_empty_queue() {
        let queue = CorrelatedQueue::new("command", 10, Duration::from_secs(5));
        let started = Instant::now();

        let result = queue
            .wait_one(&matcher_for("x10"), Duration::from_secs(2))
            .await;

        assert_eq!(
            result,
            Err(QueueError::Timeout {
                queue: "command".to_string(),
                timeout: Duration::from_secs(2),
            })
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_skipped_then_discarded() {
        let queue = CorrelatedQueue::new("system_detail", 10, Duration::from_secs(5));
        queue.enqueue(plugin_reply("detail", "x10"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(queue.len(), 1);
        assert!(queue.snapshot().is_empty());

        let result = queue.wait_one(&matcher_for("x10"), Duration::ZERO).await;
        assert!(matches!(result, Err(QueueError::Timeout { .. })));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_non_matching_entries_stay_queued() {
        let queue = CorrelatedQueue::new("system_detail", 10, Duration::from_secs(5));
        queue.enqueue(plugin_reply("detail", "xbmc_not"));
        queue.enqueue(plugin_reply("detail", "x10"));

        let message = queue
            .wait_one(&matcher_for("x10"), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(message.field("plugin"), Some("x10"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.snapshot()[0].message.field("plugin"), Some("xbmc_not"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_take_only_their_own() {
        let queue = Arc::new(CorrelatedQueue::new(
            "system_detail",
            10,
            Duration::from_secs(5),
        ));

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                queue.enqueue(plugin_reply("detail", "b"));
                tokio::time::sleep(Duration::from_millis(100)).await;
                queue.enqueue(plugin_reply("detail", "a"));
            })
        };

        let matcher_a = matcher_for("a");
        let matcher_b = matcher_for("b");
        let (a, b) = tokio::join!(
            queue.wait_one(&matcher_a, Duration::from_secs(1)),
            queue.wait_one(&matcher_b, Duration::from_secs(1)),
        );
        producer.await.unwrap();

        assert_eq!(a.unwrap().field("plugin"), Some("a"));
        assert_eq!(b.unwrap().field("plugin"), Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_starts_at_first_match() {
        let queue = Arc::new(CorrelatedQueue::new(
            "system_list",
            10,
            Duration::from_secs(5),
        ));
        let started = Instant::now();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for (at_ms, host) in [(2000, "first"), (2500, "second"), (3500, "late")] {
                    tokio::time::sleep_until(started + Duration::from_millis(at_ms)).await;
                    queue.enqueue(
                        BusMessage::builder(MessageKind::Trigger, "domogik.system")
                            .field("command", "list")
                            .field("host", host)
                            .build(),
                    );
                }
            })
        };

        let matcher = MessageMatcher::new(MessageKind::Trigger, "domogik.system");
        let replies = queue
            .wait_many(&matcher, Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
        producer.await.unwrap();

        let hosts: Vec<&str> = replies.iter().filter_map(|m| m.field("host")).collect();
        assert_eq!(hosts, vec!["first", "second"]);
        // the late reply is left for whoever wants it
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_many_times_out_without_first_match() {
        let queue = CorrelatedQueue::new("system_list", 10, Duration::from_secs(5));
        let matcher = MessageMatcher::new(MessageKind::Trigger, "domogik.system");
        let result = queue
            .wait_many(&matcher, Duration::from_secs(3), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(QueueError::Timeout { timeout, .. }) if timeout == Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_prunes_expired_head() {
        let queue = CorrelatedQueue::new("system_list", 2, Duration::from_secs(3));
        queue.enqueue(plugin_reply("list", "old"));
        tokio::time::advance(Duration::from_secs(4)).await;

        queue.enqueue(plugin_reply("list", "a"));
        queue.enqueue(plugin_reply("list", "b"));
        let plugins: Vec<String> = queue
            .drain()
            .iter()
            .map(|m| m.field("plugin").unwrap().to_string())
            .collect();
        assert_eq!(plugins, vec!["a", "b"]);
    }

    #[test]
    fn test_inbox_shares_limits_not_entries() {
        let channel = CorrelatedQueue::new("system_detail", 4, Duration::from_secs(3));
        channel.enqueue(plugin_reply("detail", "x10"));

        let inbox = channel.inbox();
        assert_eq!(inbox.name(), "system_detail");
        assert_eq!(inbox.max_size(), 4);
        assert_eq!(inbox.life_expectancy(), Duration::from_secs(3));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = CorrelatedQueue::new("ticket", 10, Duration::from_secs(5));
        queue.enqueue(plugin_reply("list", "a"));
        queue.enqueue(plugin_reply("list", "b"));
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.drain().is_empty());
    }

    proptest! {
        #[test]
        fn bounded_memory(max_size in 1usize..16, extra in 0usize..16) {
            let queue = CorrelatedQueue::new("bounded", max_size, Duration::from_secs(60));
            for i in 0..(max_size + extra) {
                queue.enqueue(plugin_reply("list", &i.to_string()));
            }
            prop_assert_eq!(queue.len(), max_size);
            let first = queue.snapshot()[0].message.field("plugin").map(str::to_string);
            prop_assert_eq!(first, Some(extra.to_string()));
        }
    }
}

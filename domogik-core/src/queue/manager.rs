use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tracing::debug;

use super::{CorrelatedQueue, QueueError, QueueResult};
use crate::config::QueueConfig;

/// Owns one [`CorrelatedQueue`] per configured channel.
///
/// Built once at startup and handed to whoever needs a channel; the set of
/// channels is fixed for the lifetime of the manager.
#[derive(Clone)]
pub struct QueueManager {
    channels: Arc<BTreeMap<String, Arc<CorrelatedQueue>>>,
    wait_timeout: Duration,
    aggregation_window: Duration,
}

impl QueueManager {
    pub fn new(config: &QueueConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|(name, channel)| {
                debug!(channel = %name, max_size = channel.max_size, "Creating queue channel");
                (
                    name.clone(),
                    Arc::new(CorrelatedQueue::new(
                        name.clone(),
                        channel.max_size,
                        config.life_expectancy,
                    )),
                )
            })
            .collect();
        Self {
            channels: Arc::new(channels),
            wait_timeout: config.wait_timeout,
            aggregation_window: config.aggregation_window,
        }
    }

    pub fn channel(&self, name: &str) -> QueueResult<Arc<CorrelatedQueue>> {
        self.channels
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::UnknownChannel(name.to_string()))
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// `"<len>/<max_size>"` per channel.
    pub fn usage(&self) -> BTreeMap<String, String> {
        self.channels
            .iter()
            .map(|(name, queue)| (name.clone(), format!("{}/{}", queue.len(), queue.max_size())))
            .collect()
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn aggregation_window(&self) -> Duration {
        self.aggregation_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusMessage, MessageKind};
    use crate::queue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_channels_from_config() {
        let manager = QueueManager::new(&QueueConfig::default());
        assert_eq!(
            manager.channel_names(),
            vec!["command", "system_detail", "system_list", "system_start", "system_stop"]
        );

        let list = manager.channel(queue::SYSTEM_LIST).unwrap();
        list.enqueue(BusMessage::builder(MessageKind::Trigger, "domogik.system").build());
        // same queue instance on every lookup
        assert_eq!(manager.channel(queue::SYSTEM_LIST).unwrap().len(), 1);
        assert_eq!(manager.usage()["system_list"], "1/10");
        assert_eq!(manager.usage()["command"], "0/10");
    }

    #[test]
    fn test_unknown_channel() {
        let manager = QueueManager::new(&QueueConfig::default());
        assert!(matches!(
            manager.channel("nope"),
            Err(QueueError::UnknownChannel(name)) if name == "nope"
        ));
    }
}

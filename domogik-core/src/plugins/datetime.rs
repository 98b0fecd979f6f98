use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    bus::{BusMessage, BusTransport, MessageKind},
    dispatch::{Handler, HandlerError},
};

pub const DATETIME_SCHEMA: &str = "datetime.basic";

/// Broadcasts the local date and time on the bus at a fixed interval.
pub struct DateTimeBroadcaster {
    bus: Arc<dyn BusTransport>,
    source: String,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl DateTimeBroadcaster {
    pub fn new(bus: Arc<dyn BusTransport>, source: impl Into<String>, interval: Duration) -> Self {
        Self {
            bus,
            source: source.into(),
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `datetime.basic` trigger for `now`. `format1` appends the weekday, Monday = 0.
    pub fn message_for(source: &str, now: NaiveDateTime) -> BusMessage {
        let datetime = now.format("%Y%m%d%H%M%S").to_string();
        let weekday = now.weekday().num_days_from_monday();
        BusMessage::builder(MessageKind::Trigger, DATETIME_SCHEMA)
            .source(source)
            .field("datetime", datetime.as_str())
            .field("date", now.format("%Y%m%d").to_string())
            .field("time", now.format("%H%M%S").to_string())
            .field("format1", format!("{}{}", datetime, weekday))
            .build()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        debug!("DateTime broadcaster stopping");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Publishes immediately, then once per interval until stopped.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            while self.running.load(Ordering::SeqCst) {
                timer.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                let message = Self::message_for(&self.source, Local::now().naive_local());
                if let Err(e) = self.bus.publish(message) {
                    warn!(error = %e, "Failed to publish time");
                }
            }
            debug!("DateTime broadcaster stopped");
        })
    }
}

/// `/helper/datetime/<command>`: the fields the clock publishes, for now or
/// for a given `YYYYMMDDhhmmss` stamp.
pub struct DateTimeHelper;

impl DateTimeHelper {
    fn usage() -> Vec<String> {
        vec![
            "now : fields of the current datetime.basic trigger".to_string(),
            "at <YYYYMMDDhhmmss> : fields for the given time".to_string(),
        ]
    }
}

#[async_trait]
impl Handler for DateTimeHelper {
    fn description(&self) -> &str {
        "datetime.basic fields published by the clock"
    }

    async fn execute(&self, args: &[String]) -> Result<Vec<String>, HandlerError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let at = match args.as_slice() {
            [] => {
                return Err(HandlerError::InvalidArguments(
                    "Bad command, no command given".to_string(),
                ));
            }
            ["help", ..] => return Ok(Self::usage()),
            ["now"] => Local::now().naive_local(),
            ["at", stamp] => NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").map_err(|e| {
                HandlerError::InvalidArguments(format!("Bad time '{}': {}", stamp, e))
            })?,
            [command, ..] => {
                return Err(HandlerError::InvalidArguments(format!(
                    "Bad command: {}",
                    command
                )));
            }
        };
        Ok(DateTimeBroadcaster::message_for("", at)
            .fields()
            .iter()
            .map(|(key, value)| format!("{} : {}", key, value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusResult;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<BusMessage>>);

    impl BusTransport for Collect {
        fn publish(&self, message: BusMessage) -> BusResult<()> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[test]
    fn test_message_fields() {
        // a Wednesday
        let now = NaiveDate::from_ymd_opt(2026, 10, 21)
            .unwrap()
            .and_hms_opt(7, 5, 9)
            .unwrap();
        let message = DateTimeBroadcaster::message_for("domogik-datetime.darkstar", now);
        assert_eq!(message.kind(), MessageKind::Trigger);
        assert_eq!(message.schema(), DATETIME_SCHEMA);
        assert_eq!(message.field("datetime"), Some("20261021070509"));
        assert_eq!(message.field("date"), Some("20261021"));
        assert_eq!(message.field("time"), Some("070509"));
        assert_eq!(message.field("format1"), Some("202610210705092"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcasts_every_interval_until_stopped() {
        let bus = Arc::new(Collect::default());
        let broadcaster = Arc::new(DateTimeBroadcaster::new(
            bus.clone(),
            "domogik-datetime.test",
            Duration::from_secs(60),
        ));

        let handle = Arc::clone(&broadcaster).spawn();
        assert!(broadcaster.is_running());
        tokio::time::sleep(Duration::from_secs(150)).await;
        // t = 0, 60, 120
        assert_eq!(bus.0.lock().unwrap().len(), 3);

        broadcaster.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.await.unwrap();
        assert_eq!(bus.0.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_helper_fields_for_stamp() {
        let lines = DateTimeHelper
            .execute(&["at".to_string(), "20261021070509".to_string()])
            .await
            .unwrap();
        assert_eq!(
            lines,
            vec![
                "datetime : 20261021070509",
                "date : 20261021",
                "time : 070509",
                "format1 : 202610210705092",
            ]
        );
    }

    #[tokio::test]
    async fn test_helper_rejects_bad_input() {
        assert!(matches!(
            DateTimeHelper.execute(&[]).await,
            Err(HandlerError::InvalidArguments(msg)) if msg.contains("no command")
        ));
        assert!(
            DateTimeHelper
                .execute(&["at".to_string(), "yesterday".to_string()])
                .await
                .is_err()
        );
        assert_eq!(DateTimeHelper.execute(&["help".to_string()]).await.unwrap().len(), 2);
        assert_eq!(DateTimeHelper.execute(&["now".to_string()]).await.unwrap().len(), 4);
    }
}

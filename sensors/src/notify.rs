//! Notification dispatch
//!
//! The escalation engine decides what to send and to whom; channel senders
//! (e-mail, SMS, chat, push, webhook) do the delivery. Each send is bounded
//! by a timeout and a failing channel never blocks the others.

use async_trait::async_trait;
use fieldwatch_store::{Alert, Device, NotificationMethod, Recipient};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Urgency wording for an escalation level
pub fn urgency(level: u32) -> &'static str {
    match level {
        0 | 1 => "requires attention",
        2 => "urgent action needed",
        _ => "emergency response required",
    }
}

/// Uniform payload handed to every channel
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub device: Device,
    pub alert: Alert,
    pub escalation_level: u32,
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(device: Device, alert: Alert, escalation_level: u32, recipients: Vec<Recipient>) -> Self {
        let subject = format!(
            "[{}] {} on {}: {}",
            alert.severity.as_str().to_uppercase(),
            alert.alert_type,
            device.name,
            urgency(escalation_level)
        );
        let body = format!(
            "Alert #{} on device {} (escalation level {}) {}.\n\n{}\n\nRaised at {}.",
            alert.id,
            device.name,
            escalation_level,
            urgency(escalation_level),
            alert.message,
            alert.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Self {
            device,
            alert,
            escalation_level,
            recipients,
            subject,
            body,
        }
    }
}

/// Channel delivery errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("No sender registered for {0}")]
    Unavailable(NotificationMethod),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Sender for one notification method
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn method(&self) -> NotificationMethod;

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError>;
}

/// Stand-in sender that records the dispatch in the log
pub struct LoggingChannel {
    method: NotificationMethod,
}

impl LoggingChannel {
    pub fn new(method: NotificationMethod) -> Self {
        Self { method }
    }
}

#[async_trait]
impl NotificationChannel for LoggingChannel {
    fn method(&self) -> NotificationMethod {
        self.method
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let recipients: Vec<&str> = notification
            .recipients
            .iter()
            .map(|r| r.address.as_str())
            .collect();
        tracing::info!(
            method = %self.method,
            alert_id = notification.alert.id,
            level = notification.escalation_level,
            recipients = ?recipients,
            "{}",
            notification.subject
        );
        Ok(())
    }
}

/// Outcome of fanning one notification out
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub delivered: Vec<NotificationMethod>,
    pub failed: Vec<(NotificationMethod, String)>,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct NotificationDispatcher {
    channels: HashMap<NotificationMethod, Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            timeout,
        }
    }

    /// Dispatcher with a [`LoggingChannel`] for each method.
    pub fn logging(methods: &[NotificationMethod], timeout: Duration) -> Self {
        let mut dispatcher = Self::new(timeout);
        for method in methods {
            dispatcher.register(Arc::new(LoggingChannel::new(*method)));
        }
        dispatcher
    }

    /// Register a sender, replacing any previous one for its method.
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.method(), channel);
    }

    pub fn methods(&self) -> Vec<NotificationMethod> {
        self.channels.keys().copied().collect()
    }

    /// Send `notification` through each of `methods`.
    pub async fn dispatch(
        &self,
        methods: &[NotificationMethod],
        notification: &Notification,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for &method in methods {
            match self.send_one(method, notification).await {
                Ok(()) => report.delivered.push(method),
                Err(e) => {
                    tracing::warn!(
                        method = %method,
                        alert_id = notification.alert.id,
                        error = %e,
                        "Notification failed"
                    );
                    report.failed.push((method, e.to_string()));
                }
            }
        }

        report
    }

    async fn send_one(
        &self,
        method: NotificationMethod,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .get(&method)
            .ok_or(ChannelError::Unavailable(method))?;

        tokio::time::timeout(self.timeout, channel.send(notification))
            .await
            .map_err(|_| ChannelError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fieldwatch_store::{AlertStatus, DeviceStatus, Severity};
    use std::sync::Mutex;

    fn notification(level: u32) -> Notification {
        let device = Device {
            id: 3,
            name: "pump house".to_string(),
            location_id: None,
            status: DeviceStatus::Alarm,
        };
        let alert = Alert {
            id: 11,
            device_id: 3,
            sensor_id: 4,
            rule_id: Some(2),
            alert_type: "greater_than".to_string(),
            severity: Severity::Critical,
            message: "pressure 9.1 above 8".to_string(),
            status: AlertStatus::Active,
            escalation_level: level,
            last_escalated: None,
            created_at: Utc.with_ymd_and_hms(2025, 2, 1, 6, 30, 0).unwrap(),
        };
        let recipients = vec![Recipient {
            kind: "email".to_string(),
            address: "ops@example.org".to_string(),
        }];
        Notification::new(device, alert, level, recipients)
    }

    struct Recording {
        method: NotificationMethod,
        sent: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl NotificationChannel for Recording {
        fn method(&self) -> NotificationMethod {
            self.method
        }

        async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(notification.escalation_level);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl NotificationChannel for Failing {
        fn method(&self) -> NotificationMethod {
            NotificationMethod::Sms
        }

        async fn send(&self, _: &Notification) -> Result<(), ChannelError> {
            Err(ChannelError::Rejected("gateway said no".to_string()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl NotificationChannel for Hanging {
        fn method(&self) -> NotificationMethod {
            NotificationMethod::Webhook
        }

        async fn send(&self, _: &Notification) -> Result<(), ChannelError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[test]
    fn urgency_grows_with_level() {
        assert_eq!(urgency(1), "requires attention");
        assert_eq!(urgency(2), "urgent action needed");
        assert_eq!(urgency(3), "emergency response required");
        assert_eq!(urgency(7), "emergency response required");
        assert!(notification(3).subject.contains("emergency response required"));
        assert!(notification(1).subject.starts_with("[CRITICAL]"));
    }

    #[tokio::test]
    async fn failures_do_not_block_other_channels() {
        let email = Arc::new(Recording {
            method: NotificationMethod::Email,
            sent: Mutex::new(Vec::new()),
        });
        let mut dispatcher = NotificationDispatcher::new(Duration::from_millis(50));
        dispatcher.register(Arc::new(Failing));
        dispatcher.register(Arc::new(Hanging));
        dispatcher.register(email.clone());

        let report = dispatcher
            .dispatch(
                &[
                    NotificationMethod::Sms,
                    NotificationMethod::Webhook,
                    NotificationMethod::Push,
                    NotificationMethod::Email,
                ],
                &notification(2),
            )
            .await;

        assert_eq!(report.delivered, vec![NotificationMethod::Email]);
        let failed: Vec<NotificationMethod> = report.failed.iter().map(|(m, _)| *m).collect();
        assert_eq!(
            failed,
            vec![
                NotificationMethod::Sms,
                NotificationMethod::Webhook,
                NotificationMethod::Push
            ]
        );
        assert!(report.failed[1].1.contains("timed out"));
        assert_eq!(*email.sent.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn logging_dispatcher_delivers_everywhere() {
        let methods = [NotificationMethod::Email, NotificationMethod::Chat];
        let dispatcher = NotificationDispatcher::logging(&methods, Duration::from_secs(1));
        let report = dispatcher.dispatch(&methods, &notification(1)).await;
        assert!(report.all_delivered());
        assert_eq!(report.delivered.len(), 2);
    }
}

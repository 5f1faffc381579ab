//! Escalation Engine
//!
//! Periodically advances unacknowledged alerts one level at a time and fans
//! the escalation out to the rule's notification channels.
//!
//! Each alert is processed by at most one task at a time: an [`InFlight`]
//! set hands out RAII permits keyed by alert id, so overlapping ticks skip
//! alerts that are still being handled. Suppressed alerts only have their
//! `last_escalated` stamp refreshed; they keep their level.

use crate::notify::{DispatchReport, Notification, NotificationDispatcher};
use crate::Result;
use fieldwatch_store::{AlertId, Clock, EscalationCandidate, SuppressionCheck, TelemetryStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Scheduler period
    pub interval: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Alert ids currently being escalated
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<AlertId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`, or `None` if another task holds it.
    pub fn try_acquire(&self, id: AlertId) -> Option<InFlightPermit> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id) {
            return None;
        }
        Some(InFlightPermit {
            id,
            ids: Arc::clone(&self.ids),
        })
    }

    pub fn contains(&self, id: AlertId) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }
}

/// Released when dropped
#[derive(Debug)]
pub struct InFlightPermit {
    id: AlertId,
    ids: Arc<Mutex<HashSet<AlertId>>>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub escalated: usize,
    pub suppressed: usize,
    pub skipped_in_flight: usize,
    /// Handled by an overlapping tick after this one listed it
    pub skipped_stale: usize,
    pub failed: usize,
}

enum Step {
    Escalated { level: u32, dispatch: DispatchReport },
    Suppressed,
    Stale,
}

#[derive(Clone)]
pub struct EscalationEngine {
    store: Arc<dyn TelemetryStore>,
    suppression: Arc<dyn SuppressionCheck>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
    config: EscalationConfig,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        suppression: Arc<dyn SuppressionCheck>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            store,
            suppression,
            dispatcher,
            clock,
            in_flight: InFlight::new(),
            config,
        }
    }

    /// Share an in-flight set with another engine instance.
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Run one scan. A store error while listing candidates aborts the
    /// tick; errors on individual alerts are counted in the report.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let candidates = self.store.escalation_candidates(now).await?;
        let mut report = TickReport::default();
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            let alert_id = candidate.alert.id;
            let Some(permit) = self.in_flight.try_acquire(alert_id) else {
                tracing::debug!(alert_id, "Escalation already in flight");
                report.skipped_in_flight += 1;
                continue;
            };

            let engine = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (alert_id, engine.escalate(candidate).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Step::Escalated { level, dispatch }))) => {
                    report.escalated += 1;
                    if !dispatch.all_delivered() {
                        tracing::debug!(level, failed = dispatch.failed.len(), "Partial delivery");
                    }
                }
                Ok((_, Ok(Step::Suppressed))) => report.suppressed += 1,
                Ok((_, Ok(Step::Stale))) => report.skipped_stale += 1,
                Ok((alert_id, Err(e))) => {
                    tracing::error!(alert_id, error = %e, "Escalation failed");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Escalation task panicked");
                    report.failed += 1;
                }
            }
        }

        if report.escalated + report.suppressed + report.failed > 0 {
            tracing::info!(
                escalated = report.escalated,
                suppressed = report.suppressed,
                skipped = report.skipped_in_flight,
                stale = report.skipped_stale,
                failed = report.failed,
                "Escalation tick complete"
            );
        }

        Ok(report)
    }

    async fn escalate(&self, candidate: EscalationCandidate) -> Result<Step> {
        let EscalationCandidate { alert, rule, device } = candidate;
        let now = self.clock.now();

        // The candidate list may predate another tick's escalation of the
        // same alert; only the stored row under the permit counts
        let alert = match self.store.alert(alert.id).await? {
            Some(current) if rule.is_due(&current, now) => current,
            _ => {
                tracing::debug!(alert_id = alert.id, "Alert no longer due, skipping");
                return Ok(Step::Stale);
            }
        };

        if self
            .suppression
            .is_suppressed(alert.device_id, &alert.alert_type, alert.severity)
            .await?
        {
            self.store.touch_escalation(alert.id, now).await?;
            tracing::debug!(alert_id = alert.id, "Escalation deferred by silent window");
            return Ok(Step::Suppressed);
        }

        let level = alert.escalation_level + 1;
        self.store.record_escalation(alert.id, level, now).await?;
        tracing::info!(
            alert_id = alert.id,
            rule_id = rule.id,
            level,
            max_level = rule.max_escalation_level,
            "Alert escalated"
        );

        // Delivery failures are reported but do not undo the escalation
        let notification = Notification::new(device, alert, level, rule.recipients.clone());
        let dispatch = self
            .dispatcher
            .dispatch(&rule.notification_methods, &notification)
            .await;

        Ok(Step::Escalated { level, dispatch })
    }

    /// Tick every `interval` until `cancel` fires. A tick that has started
    /// runs to completion before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.config.interval, "Escalation scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_tick().await {
                        tracing::warn!(error = %e, "Escalation tick aborted, retrying next interval");
                    }
                }
            }
        }

        tracing::info!("Escalation scheduler stopped");
    }
}

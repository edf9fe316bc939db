//! Operational alerting.
//!
//! Critical conditions (feed blocked past threshold, repeated venue
//! disconnects, reconciliation mismatch, daily PnL breach) fire P1 alerts.
//! Delivery channels are a collaborator concern; this records and logs.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    P1,
    P2,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::P1 => write!(f, "P1"),
            AlertSeverity::P2 => write!(f, "P2"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub name: String,
    pub condition: String,
    pub message: String,
    pub fired_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
}

pub struct AlertManager {
    alerts: RwLock<Vec<Alert>>,
    channels: Vec<String>,
}

impl AlertManager {
    pub fn new(channels: Vec<String>) -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
            channels,
        }
    }

    pub fn fire(
        &self,
        severity: AlertSeverity,
        name: impl Into<String>,
        condition: impl Into<String>,
        message: impl Into<String>,
    ) {
        let alert = Alert {
            severity,
            name: name.into(),
            condition: condition.into(),
            message: message.into(),
            fired_at: Utc::now(),
            acked_at: None,
        };

        error!(
            severity = %alert.severity,
            name = %alert.name,
            condition = %alert.condition,
            message = %alert.message,
            "alert fired"
        );

        for channel in &self.channels {
            info!(channel = %channel, name = %alert.name, "alert dispatched");
        }

        self.alerts.write().push(alert);
    }

    pub fn active(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| a.acked_at.is_none())
            .cloned()
            .collect()
    }

    pub fn acknowledge(&self, name: &str) {
        let now = Utc::now();
        for alert in self.alerts.write().iter_mut() {
            if alert.name == name && alert.acked_at.is_none() {
                alert.acked_at = Some(now);
            }
        }
    }
}

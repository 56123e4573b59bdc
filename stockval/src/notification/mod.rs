//! Report delivery.
//!
//! [`MessageFormatter`] renders notifications to Markdown and
//! [`TelegramNotifier`] queues them for delivery through the Telegram Bot
//! API. The analysis workflow only sees the [`Notifier`] trait.

pub mod format;
pub mod telegram;

pub use format::MessageFormatter;
pub use telegram::{fetch_latest_chat_id, split_message, NotificationError, TelegramNotifier};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::valuation::ValuationReport;

/// Something worth telling the user about.
#[derive(Debug, Clone)]
pub enum Notification {
    Valuation(Box<ValuationReport>),
    Error(ErrorAlert),
    Warning(RiskWarning),
    /// Pre-formatted text, sent as is
    Text(String),
}

/// System failure alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAlert {
    /// Component that failed
    pub module: String,
    pub error_info: String,
    /// Suggested next step for the operator
    pub advice: String,
    /// Defaults to the time of formatting
    pub timestamp: Option<DateTime<Local>>,
}

impl ErrorAlert {
    pub fn new(
        module: impl Into<String>,
        error_info: impl Into<String>,
        advice: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            error_info: error_info.into(),
            advice: advice.into(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Risk warning for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskWarning {
    pub symbol: String,
    /// One line per triggered indicator
    pub metrics: Vec<String>,
    pub advice: String,
    pub timestamp: Option<DateTime<Local>>,
}

/// Delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hand a notification over for delivery.
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;

    /// Flush pending notifications and release resources.
    async fn close(&self);
}

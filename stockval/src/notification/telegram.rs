//! Telegram Bot API notifier.
//!
//! Messages are queued on an unbounded channel and delivered by a background
//! task, one every [`SEND_INTERVAL`]. Long messages are split on Markdown
//! boundaries to fit Telegram's 4096 character limit. Transport failures are
//! retried with backoff; API rejections are logged and dropped.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use stockval_common::config::TelegramConfig;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::format::MessageFormatter;
use super::{Notification, Notifier};
use crate::data::RetryPolicy;

/// Telegram's per-message character limit.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Pause between queued messages.
pub const SEND_INTERVAL: Duration = Duration::from_millis(100);

/// Preferred split points, strongest first.
const SPLIT_MARKERS: &[&str] = &["\n\n## ", "\n\n", "\n* "];

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Telegram 网络错误: {0}")]
    Transport(String),

    #[error("Telegram API 错误 {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Telegram 返回失败: {0}")]
    Rejected(String),

    #[error("Telegram 配置缺失: {0}")]
    NotConfigured(&'static str),

    #[error("通知器已关闭")]
    Closed,
}

impl NotificationError {
    /// Only network-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

// ============================================================================
// Message splitting
// ============================================================================

/// Split `message` into trimmed, non-empty chunks of at most `max_chars`
/// characters, preferring section, paragraph and list boundaries.
pub fn split_message(message: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = message;

    loop {
        let Some((window_end, _)) = rest.char_indices().nth(max_chars) else {
            let tail = rest.trim();
            if !tail.is_empty() {
                chunks.push(tail.to_string());
            }
            break;
        };

        let window = &rest[..window_end];
        let split = SPLIT_MARKERS
            .iter()
            .find_map(|marker| window.rfind(marker).filter(|&pos| pos > 0))
            .unwrap_or(window_end);

        let chunk = rest[..split].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = &rest[split..];
    }

    chunks
}

// ============================================================================
// Bot API client
// ============================================================================

#[derive(Clone)]
struct BotClient {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    parse_mode: String,
    retry: RetryPolicy,
}

impl BotClient {
    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// Send a full message, chunk by chunk.
    async fn send_text(&self, text: &str) -> Result<(), NotificationError> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            self.retry
                .run(
                    "telegram.sendMessage",
                    |attempt| {
                        if attempt > 0 {
                            warn!(attempt, "Retrying Telegram send");
                        }
                        self.send_chunk(&chunk)
                    },
                    NotificationError::is_transient,
                )
                .await?;
        }
        Ok(())
    }

    async fn send_chunk(&self, chunk: &str) -> Result<(), NotificationError> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": chunk,
            "parse_mode": self.parse_mode,
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        // Telegram already accepted the message; resending would duplicate it
        let body: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| NotificationError::Rejected(format!("无法解析响应: {e}")))?;
        if !body.ok {
            return Err(NotificationError::Rejected(
                body.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Queued Telegram notifier.
///
/// Must be created inside a Tokio runtime; the delivery task is spawned on
/// construction and joined by [`Notifier::close`].
pub struct TelegramNotifier {
    formatter: MessageFormatter,
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self::with_retry_policy(config, RetryPolicy::telegram(config.retry_count))
    }

    pub fn with_retry_policy(config: &TelegramConfig, retry: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let bot = BotClient {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            parse_mode: config.parse_mode.clone(),
            retry,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver(bot, rx));

        Self {
            formatter: MessageFormatter::new(),
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Format and enqueue a notification.
    pub async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        let text = self.formatter.format(&notification);
        let sender = self.sender.lock().await;
        let tx = sender.as_ref().ok_or(NotificationError::Closed)?;
        tx.send(text).map_err(|_| NotificationError::Closed)
    }
}

async fn deliver(bot: BotClient, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = rx.recv().await {
        match bot.send_text(&message).await {
            Ok(()) => debug!(chars = message.chars().count(), "Telegram message delivered"),
            Err(e) => {
                let preview: String = message.chars().take(60).collect();
                error!(error = %e, preview = %preview, "Telegram message dropped");
            }
        }
        tokio::time::sleep(SEND_INTERVAL).await;
    }
    debug!("Telegram delivery task finished");
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        self.send(notification).await
    }

    async fn close(&self) {
        // Dropping the sender lets the worker drain what is queued and exit
        self.sender.lock().await.take();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Telegram delivery task failed");
            }
        }
    }
}

// ============================================================================
// Chat discovery
// ============================================================================

#[derive(Debug, Deserialize)]
struct Update {
    message: Option<UpdateMessage>,
    channel_post: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Chat id of the most recent update the bot received, via `getUpdates`.
///
/// `Ok(None)` means the bot has no pending updates; someone has to message
/// it first.
pub async fn fetch_latest_chat_id(config: &TelegramConfig) -> Result<Option<i64>, NotificationError> {
    if config.bot_token.trim().is_empty() {
        return Err(NotificationError::NotConfigured("telegram.bot_token"));
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
    let url = format!(
        "{}/bot{}/getUpdates",
        config.api_base.trim_end_matches('/'),
        config.bot_token
    );

    let response = client.get(&url).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), "获取更新失败");
        return Err(NotificationError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let body: ApiResponse<Vec<Update>> = response.json().await?;
    if !body.ok {
        return Err(NotificationError::Rejected(
            body.description.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let Some(latest) = body.result.and_then(|updates| updates.into_iter().last()) else {
        warn!("没有找到任何更新，请先与机器人对话");
        return Ok(None);
    };

    match latest.message.or(latest.channel_post) {
        Some(message) => {
            info!(chat_id = message.chat.id, "成功获取chat_id");
            Ok(Some(message.chat.id))
        }
        None => {
            error!("无法从更新中提取chat_id");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("Hello, World!", 4096), vec!["Hello, World!"]);
        assert!(split_message("   \n ", 4096).is_empty());
    }

    #[test]
    fn test_split_prefers_sections() {
        let section = |title: &str| format!("## {title}\n{}", "x".repeat(30));
        let text = format!("{}\n\n{}\n\n{}", section("A"), section("B"), section("C"));
        let chunks = split_message(&text, 80);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("## A") && chunks[0].contains("## B"));
        assert!(chunks[1].starts_with("## C"));
    }

    #[test]
    fn test_split_falls_back_to_list_items() {
        let text = format!("intro\n* {}\n* {}", "a".repeat(20), "b".repeat(20));
        let chunks = split_message(&text, 35);
        assert_eq!(chunks[0], format!("intro\n* {}", "a".repeat(20)));
        assert_eq!(chunks[1], format!("* {}", "b".repeat(20)));
    }

    #[test]
    fn test_split_hard_limit() {
        let msg = "x".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn test_split_counts_characters() {
        // 3 bytes per char; a byte-based split would panic or overshoot
        let msg = "估".repeat(10);
        let chunks = split_message(&msg, 4);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(chunks.concat(), msg);
    }

    #[test]
    fn test_transient_errors() {
        assert!(NotificationError::Transport("reset".into()).is_transient());
        assert!(!NotificationError::Api {
            status: 400,
            body: "bad".into()
        }
        .is_transient());
        assert!(!NotificationError::Rejected("chat not found".into()).is_transient());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let config = TelegramConfig {
            bot_token: "token".into(),
            chat_id: "1".into(),
            timeout: 1,
            parse_mode: "Markdown".into(),
            api_base: "http://127.0.0.1:9".into(),
            retry_count: 1,
        };
        let notifier = TelegramNotifier::new(&config);
        notifier.close().await;
        assert!(matches!(
            notifier.send(Notification::Text("late".into())).await,
            Err(NotificationError::Closed)
        ));
    }
}

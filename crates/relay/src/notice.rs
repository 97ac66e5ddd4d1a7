//! Local notice boundary
//!
//! Local notices are shown on the acting device itself: the no-match
//! informational notice, the fan-out confirmation, and the on-device copy of
//! a response notification. [`NoticeFeed`] keeps the most recent notices in a
//! bounded buffer so they can be read back by the node's HTTP surface.

use async_trait::async_trait;
use lifeline_core::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::composer::ComposedNotification;

/// Local notice errors
#[derive(Debug, Error)]
pub enum NoticeError {
    /// Surface refused the notice
    #[error("Local notice rejected: {0}")]
    Rejected(String),
}

/// Opaque notice identifier
pub type NoticeId = String;

/// When the notice should appear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoticeTrigger {
    /// Show now
    Immediate,
    /// Show after a delay
    After {
        /// Delay in seconds
        seconds: u64,
    },
}

/// Content handed to the local surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalNotice {
    /// Title line
    pub title: String,
    /// Body text
    pub body: String,
    /// Routing metadata
    pub data: BTreeMap<String, Value>,
    /// Channel id
    pub channel_id: String,
    /// Presentation trigger
    pub trigger: NoticeTrigger,
}

impl LocalNotice {
    /// Immediate notice carrying `content` on `channel_id`
    pub fn immediate(content: &ComposedNotification, channel_id: &str) -> Self {
        Self {
            title: content.title.clone(),
            body: content.body.clone(),
            data: content.data.clone(),
            channel_id: channel_id.to_string(),
            trigger: NoticeTrigger::Immediate,
        }
    }
}

/// Local-notification surface
#[async_trait]
pub trait LocalNoticeSink: Send + Sync {
    /// Present or schedule a notice
    async fn present(&self, notice: LocalNotice) -> Result<NoticeId, NoticeError>;
}

/// Notice kept by [`NoticeFeed`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredNotice {
    /// Assigned identifier
    pub id: NoticeId,
    /// Unix epoch milliseconds
    pub created_at: u64,
    /// Notice content
    #[serde(flatten)]
    pub notice: LocalNotice,
}

/// Bounded in-process notice buffer
pub struct NoticeFeed {
    notices: Mutex<VecDeque<StoredNotice>>,
    max_buffer_size: usize,
    clock: Arc<dyn Clock>,
}

impl NoticeFeed {
    /// Default buffer size
    pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100;

    /// Create a feed with the default buffer size
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create a feed holding at most `max_buffer_size` notices
    pub fn with_capacity(max_buffer_size: usize) -> Self {
        Self {
            notices: Mutex::new(VecDeque::new()),
            max_buffer_size: max_buffer_size.max(1),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp notices with `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Most recent notices, newest first
    pub fn recent(&self, count: usize) -> Vec<StoredNotice> {
        self.lock().iter().rev().take(count).cloned().collect()
    }

    /// All buffered notices, oldest first
    pub fn all(&self) -> Vec<StoredNotice> {
        self.lock().iter().cloned().collect()
    }

    /// Number of buffered notices
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the feed is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clear the buffer
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<StoredNotice>> {
        self.notices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for NoticeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalNoticeSink for NoticeFeed {
    async fn present(&self, notice: LocalNotice) -> Result<NoticeId, NoticeError> {
        let stored = StoredNotice {
            id: Uuid::new_v4().to_string(),
            created_at: self.clock.now_ms(),
            notice,
        };
        let id = stored.id.clone();

        let mut notices = self.lock();
        notices.push_back(stored);
        while notices.len() > self.max_buffer_size {
            notices.pop_front();
        }

        Ok(id)
    }
}

/// Sink that only logs notices
#[derive(Debug, Default)]
pub struct TracingNoticeSink;

#[async_trait]
impl LocalNoticeSink for TracingNoticeSink {
    async fn present(&self, notice: LocalNotice) -> Result<NoticeId, NoticeError> {
        let id = Uuid::new_v4().to_string();
        info!(
            notice_id = %id,
            channel = %notice.channel_id,
            title = %notice.title,
            "Local notice"
        );
        Ok(id)
    }
}

//! Notification payloads and the dispatcher capability.
//!
//! The protocol builds a [`Notification`] at each lifecycle step and hands it
//! to a [`Notifier`]. Delivery is best-effort: a dispatch error is logged by
//! the protocol and never undoes the state transition that triggered it.

use std::fmt;

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use crate::error::{ConsentError, Result};
use crate::session::Metadata;

/// Notification type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "handshake.request")]
    Request,
    #[serde(rename = "handshake.response")]
    Response,
    #[serde(rename = "handshake.cancelled")]
    Cancelled,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Request => write!(f, "handshake.request"),
            NotificationKind::Response => write!(f, "handshake.response"),
            NotificationKind::Cancelled => write!(f, "handshake.cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient_identifier: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Delivers a notification to its recipient.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, notification: Notification) -> Result<()>;
}

/// Bounded in-process outbox. The embedding application drains it and
/// forwards notifications to its real delivery channel.
///
/// Dispatch fails once the outbox is full.
pub struct Outbox {
    queue: ArrayQueue<Notification>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Remove and return everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(n) = self.queue.pop() {
            out.push(n);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Notifier for Outbox {
    fn dispatch(&self, notification: Notification) -> Result<()> {
        self.queue.push(notification).map_err(|rejected| {
            ConsentError::Notification(format!(
                "outbox full ({} queued), dropped {} for {}",
                self.queue.capacity(),
                rejected.kind,
                rejected.recipient_identifier
            ))
        })
    }
}

//! Per-user notification preferences.

use serde::{Deserialize, Serialize};

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    InApp,
}

/// Kinds of notification a user can individually switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TaskAssigned,
    TaskMention,
    TaskReassigned,
    DeadlineApproaching,
    ApprovalNeeded,
    ClientMessage,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::TaskAssigned => write!(f, "task_assigned"),
            NotificationType::TaskMention => write!(f, "task_mention"),
            NotificationType::TaskReassigned => write!(f, "task_reassigned"),
            NotificationType::DeadlineApproaching => write!(f, "deadline_approaching"),
            NotificationType::ApprovalNeeded => write!(f, "approval_needed"),
            NotificationType::ClientMessage => write!(f, "client_message"),
        }
    }
}

/// A user's notification settings. Every flag defaults to enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct NotificationSettings {
    pub email_notifications: bool,
    pub in_app_notifications: bool,
    pub task_assigned: bool,
    pub task_mention: bool,
    pub task_reassigned: bool,
    pub deadline_approaching: bool,
    pub approval_needed: bool,
    pub client_message: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            email_notifications: true,
            in_app_notifications: true,
            task_assigned: true,
            task_mention: true,
            task_reassigned: true,
            deadline_approaching: true,
            approval_needed: true,
            client_message: true,
        }
    }
}

impl NotificationSettings {
    /// Global email switch; gates every queued email to this user.
    pub fn allows_email(&self) -> bool {
        self.email_notifications
    }

    /// Both the channel switch and the per-type switch must be on.
    pub fn allows(&self, kind: NotificationType, channel: NotificationChannel) -> bool {
        let channel_enabled = match channel {
            NotificationChannel::Email => self.email_notifications,
            NotificationChannel::InApp => self.in_app_notifications,
        };
        channel_enabled && self.type_enabled(kind)
    }

    fn type_enabled(&self, kind: NotificationType) -> bool {
        match kind {
            NotificationType::TaskAssigned => self.task_assigned,
            NotificationType::TaskMention => self.task_mention,
            NotificationType::TaskReassigned => self.task_reassigned,
            NotificationType::DeadlineApproaching => self.deadline_approaching,
            NotificationType::ApprovalNeeded => self.approval_needed,
            NotificationType::ClientMessage => self.client_message,
        }
    }
}

/// Resolves whether a notification may be sent; missing settings allow it.
pub fn should_send_notification(
    settings: Option<&NotificationSettings>,
    kind: NotificationType,
    channel: NotificationChannel,
) -> bool {
    settings.map_or(true, |s| s.allows(kind, channel))
}

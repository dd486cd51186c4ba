//! Push notification rendering and click handling

use crate::config::NotificationConfig;
use serde::Serialize;

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Notification shown for an incoming push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub actions: Vec<NotificationAction>,
}

/// What to do after the user clicks a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    OpenWindow(String),
    Close,
}

/// Render the notification for a push payload
///
/// The payload text becomes the body; an empty or missing payload falls back
/// to the configured default body.
pub fn notification_for(config: &NotificationConfig, payload: Option<&str>) -> Notification {
    let body = payload
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| config.default_body.clone());

    Notification {
        title: config.title.clone(),
        body,
        icon: config.icon.clone(),
        badge: config.badge.clone(),
        actions: vec![
            NotificationAction {
                action: ACTION_OPEN.to_string(),
                title: "Open app".to_string(),
            },
            NotificationAction {
                action: ACTION_DISMISS.to_string(),
                title: "Dismiss".to_string(),
            },
        ],
    }
}

/// Clicking the body or "open" opens the root page; "dismiss" just closes
pub fn click_outcome(action: Option<&str>) -> ClickOutcome {
    match action {
        Some(ACTION_DISMISS) => ClickOutcome::Close,
        _ => ClickOutcome::OpenWindow("/".to_string()),
    }
}

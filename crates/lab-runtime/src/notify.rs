use lab_core::{JobId, NodeId, OwnerId};
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    JobCompleted,
    LevelUp,
    ResearchUnlocked,
    JobPromoted,
}

/// Player-facing record produced by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub owner: OwnerId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub deep_link: Option<String>,
}

impl Notification {
    pub fn new(
        owner: &OwnerId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.clone(),
            kind,
            title: title.into(),
            message: message.into(),
            deep_link: None,
        }
    }

    pub fn with_link(mut self, link: String) -> Self {
        self.deep_link = Some(link);
        self
    }
}

pub fn job_link(job: JobId) -> String {
    format!("lab://jobs/{job}")
}

pub fn research_link(node: &NodeId) -> String {
    format!("lab://research/{node}")
}

/// Notification surface. The engine only produces.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Collects notifications in memory until drained.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Mutex<Vec<Notification>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for Outbox {
    fn publish(&self, notification: Notification) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}

/// Writes every notification to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, n: Notification) {
        info!(
            owner = %n.owner,
            kind = ?n.kind,
            link = n.deep_link.as_deref().unwrap_or(""),
            "{}: {}",
            n.title,
            n.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_drains_in_order() {
        let out = Outbox::new();
        let p = OwnerId::new("p");
        out.publish(Notification::new(&p, NotificationKind::LevelUp, "Level up", "2"));
        out.publish(
            Notification::new(&p, NotificationKind::JobCompleted, "Job complete", "x")
                .with_link(job_link(JobId(4))),
        );
        let items = out.drain();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].deep_link.as_deref(), Some("lab://jobs/4"));
        assert!(out.is_empty());
    }

    #[test]
    fn research_links_name_the_node() {
        assert_eq!(
            research_link(&NodeId::new("transformers")),
            "lab://research/transformers"
        );
    }
}

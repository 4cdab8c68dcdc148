//! Zapgate Access Policy
//!
//! Blacklist/whitelist authorization over chat sender ids

use std::collections::HashSet;
use zapgate_config::{AccessConfig, AccessMode};

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    mode: AccessMode,
    ids: HashSet<i64>,
    first_id: Option<i64>,
    notify_chat_id: Option<i64>,
}

impl AccessPolicy {
    pub fn new(config: &AccessConfig) -> Self {
        let ordered = config.ids.resolve();
        Self {
            mode: config.mode,
            first_id: ordered.first().copied(),
            ids: ordered.into_iter().collect(),
            notify_chat_id: config.notify_chat_id,
        }
    }

    /// Blacklist mode: authorized unless listed.
    /// Whitelist mode: authorized only when listed.
    pub fn is_authorized(&self, sender_id: i64) -> bool {
        match self.mode {
            AccessMode::Blacklist => !self.ids.contains(&sender_id),
            AccessMode::Whitelist => self.ids.contains(&sender_id),
        }
    }

    /// Chat that should receive the startup notice: the configured one, or
    /// the first whitelisted id when running in whitelist mode.
    pub fn notify_target(&self) -> Option<i64> {
        self.notify_chat_id.or(match self.mode {
            AccessMode::Whitelist => self.first_id,
            AccessMode::Blacklist => None,
        })
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn id_count(&self) -> usize {
        self.ids.len()
    }
}

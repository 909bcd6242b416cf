//! The update-check cycle: fetch the marker, compare it with the stored one,
//! persist a change, then announce it to every recipient.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::platform::{Broadcaster, NotificationLink, NotificationPayload};
use crate::source::{MarkerSource, UpdateMarker};
use crate::storage::{RecipientRecord, Storage};

/// How one cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A previous cycle was still running
    Skipped,
    /// The page did not yield a marker
    Unavailable,
    Unchanged,
    /// Storage failed before anything was sent
    Aborted,
    /// Marker saved, but there was nobody to notify
    NoRecipients,
    Broadcast { delivered: usize, failed: usize },
}

/// Message text and button used for change announcements
#[derive(Debug, Clone)]
pub struct NotificationTemplate {
    /// `{marker}` is replaced with the new marker
    pub message: String,
    pub link: Option<NotificationLink>,
}

impl NotificationTemplate {
    pub fn render(&self, marker: &UpdateMarker) -> NotificationPayload {
        NotificationPayload {
            text: self.message.replace("{marker}", marker.as_str()),
            link: self.link.clone(),
        }
    }
}

pub struct UpdateJob {
    source: Arc<dyn MarkerSource>,
    storage: Arc<dyn Storage>,
    broadcaster: Arc<dyn Broadcaster>,
    template: NotificationTemplate,
    in_flight: Mutex<()>,
}

impl UpdateJob {
    pub fn new(
        source: Arc<dyn MarkerSource>,
        storage: Arc<dyn Storage>,
        broadcaster: Arc<dyn Broadcaster>,
        template: NotificationTemplate,
    ) -> Self {
        Self {
            source,
            storage,
            broadcaster,
            template,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one update-check cycle.
    ///
    /// Never fails: every error is logged and the next scheduled cycle tries
    /// again. The new marker is saved before anything is sent, so a crash
    /// mid-broadcast cannot announce the same change twice. If the save
    /// fails nothing is sent. Overlapping calls are not queued; the later one
    /// returns [`CycleOutcome::Skipped`].
    pub async fn run_update_check(&self) -> CycleOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Update check still running, skipping this cycle");
            return CycleOutcome::Skipped;
        };

        info!("Update check started");
        let outcome = self.check().await;
        if let CycleOutcome::Broadcast { delivered, failed } = &outcome {
            info!("Update announced to {} chats, {} failed", delivered, failed);
        }
        info!("Update check finished: {:?}", outcome);
        outcome
    }

    async fn check(&self) -> CycleOutcome {
        let Some(marker) = self.source.fetch_marker().await else {
            warn!("Could not determine the deck list update marker, nothing to do");
            return CycleOutcome::Unavailable;
        };

        let last_known = match self.storage.load_marker().await {
            Ok(last_known) => last_known,
            Err(e) => {
                error!("Failed to load the last known marker: {:#}", e);
                return CycleOutcome::Aborted;
            }
        };

        if last_known.as_ref() == Some(&marker) {
            info!("No new update: the page still shows {}", marker);
            return CycleOutcome::Unchanged;
        }

        info!(
            "New update detected: {} (last known: {})",
            marker,
            last_known
                .as_ref()
                .map_or("none", UpdateMarker::as_str)
        );

        if let Err(e) = self.storage.save_marker(&marker).await {
            error!(
                "Failed to save marker {}, not notifying anyone this cycle: {:#}",
                marker, e
            );
            return CycleOutcome::Aborted;
        }

        let records = match self.storage.load_recipients().await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load recipients: {:#}", e);
                return CycleOutcome::Aborted;
            }
        };

        let chat_ids = unique_chat_ids(&records);
        if chat_ids.is_empty() {
            warn!("No recipients registered for update {}", marker);
            return CycleOutcome::NoRecipients;
        }

        let payload = self.template.render(&marker);
        let mut delivered = 0;
        let mut failed = 0;
        for chat_id in chat_ids {
            match self.broadcaster.send(chat_id, &payload).await {
                Ok(()) => {
                    info!("Update notification sent to chat {}", chat_id);
                    delivered += 1;
                }
                Err(e) => {
                    error!("Failed to notify chat {}: {:#}", chat_id, e);
                    failed += 1;
                }
            }
        }

        CycleOutcome::Broadcast { delivered, failed }
    }
}

/// Chat ids in file order, first occurrence wins. Records without an id are
/// logged and skipped.
fn unique_chat_ids(records: &[RecipientRecord]) -> Vec<i64> {
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(records.len());
    for record in records {
        match record.chat_id {
            Some(id) => {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
            None => warn!("Recipient entry without a usable chat_id: {:?}", record.metadata),
        }
    }
    ids
}

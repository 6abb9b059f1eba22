//! Attendance recorder: turns recognized identities into attendance events.

use crate::records::{AttendanceEvent, UploadContext};
use crate::store::{bounded, AttendanceStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Knobs for the recording step.
#[derive(Debug, Clone, Default)]
pub struct RecorderPolicy {
    /// Skip the event when the identity already has one this recent.
    /// `None` writes one event per upload, even for back-to-back uploads.
    pub duplicate_window: Option<Duration>,
}

/// Per-identity result of one recording batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub recorded: BTreeSet<String>,
    /// Identities skipped because of the duplicate window.
    pub suppressed: BTreeSet<String>,
    /// Identity -> cause, for identities whose event was not written.
    pub failed: BTreeMap<String, String>,
}

enum Recorded {
    Written,
    Suppressed,
}

pub struct AttendanceRecorder {
    store: Arc<dyn AttendanceStore>,
    timeout: Duration,
    policy: RecorderPolicy,
}

impl AttendanceRecorder {
    pub fn new(store: Arc<dyn AttendanceStore>, timeout: Duration, policy: RecorderPolicy) -> Self {
        Self { store, timeout, policy }
    }

    /// Record attendance for every identity independently.
    ///
    /// A failure for one identity never stops the others; it is collected
    /// in [`RecordOutcome::failed`].
    pub async fn record(&self, identities: &BTreeSet<String>, ctx: &UploadContext) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();

        for identity in identities {
            match self.record_one(identity, ctx).await {
                Ok(Recorded::Written) => {
                    outcome.recorded.insert(identity.clone());
                }
                Ok(Recorded::Suppressed) => {
                    tracing::info!(identity = %identity, "attendance already recorded within window; skipped");
                    outcome.suppressed.insert(identity.clone());
                }
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "attendance recording failed");
                    outcome.failed.insert(identity.clone(), e.to_string());
                }
            }
        }

        outcome
    }

    async fn record_one(&self, identity: &str, ctx: &UploadContext) -> Result<Recorded, StoreError> {
        bounded(self.timeout, self.store.upsert_identity(identity)).await?;

        // Re-read so the event carries whatever the store now holds, even if
        // a concurrent roster update landed between the two calls.
        let record = bounded(self.timeout, self.store.get_identity(identity))
            .await?
            .ok_or_else(|| StoreError::NotFound(identity.to_string()))?;

        if let Some(window) = self.policy.duplicate_window {
            let latest = bounded(self.timeout, self.store.latest_attendance(identity)).await?;
            if let Some(latest) = latest {
                let age = ctx.timestamp.signed_duration_since(latest);
                if age.to_std().map_or(true, |age| age < window) {
                    return Ok(Recorded::Suppressed);
                }
            }
        }

        let event = AttendanceEvent::new(&record, ctx);
        bounded(self.timeout, self.store.append_attendance_event(&event)).await?;
        tracing::debug!(identity = %identity, event = %event.id, "attendance recorded");
        Ok(Recorded::Written)
    }
}

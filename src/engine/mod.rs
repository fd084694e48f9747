mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod validate;

pub use error::{BookingError, TimeError};
pub use mutations::{CreateRequest, Created, RelinkReport, RoomSelection, UpdateRequest, Updated};
pub use store::{
    ListFilter, ReservationPatch, ReservationStore, StoreError, UpdateCondition, WalStore,
};
pub use validate::TimeInput;

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::audit::{AuditEvent, AuditLevel, AuditSink};
use crate::model::*;
use crate::observability;
use crate::users::{self, UserDirectory};

/// What to do with a user identifier the directory cannot resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserPolicy {
    /// Reject with `UserNotFound`.
    #[default]
    Strict,
    /// Store the raw text (legacy clients).
    AllowRaw,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Closed set of bookable room keys.
    pub rooms: Vec<String>,
    pub user_policy: UserPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rooms: vec!["A101".into(), "A102".into(), "A103".into()],
            user_policy: UserPolicy::Strict,
        }
    }
}

/// The booking core: conflict detection and the create/update/cancel protocol.
///
/// Holds no locks across a request. The store's single-record atomicity is the
/// only concurrency primitive, so two requests can both pass the pre-write
/// check for the same slot; the post-write re-check reports that case.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        users: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            users,
            audit,
            settings,
        }
    }

    /// Rooms accepted by create and update.
    pub fn rooms(&self) -> &[String] {
        &self.settings.rooms
    }

    pub(super) fn check_room(&self, room: &str) -> Result<(), BookingError> {
        if self.settings.rooms.iter().any(|r| r == room) {
            Ok(())
        } else {
            Err(BookingError::UnknownRoom(room.to_string()))
        }
    }

    /// Resolve a free-text user under the configured policy. Returns the user
    /// reference and the raw text to keep alongside a resolved user.
    pub(super) async fn resolve_user(
        &self,
        raw: &str,
    ) -> Result<(UserRef, Option<String>), BookingError> {
        match users::resolve(self.users.as_ref(), raw).await? {
            Some(user) => Ok((UserRef::Resolved(user), Some(raw.to_string()))),
            None => match self.settings.user_policy {
                UserPolicy::Strict => Err(BookingError::UserNotFound(raw.to_string())),
                UserPolicy::AllowRaw => Ok((UserRef::Raw(raw.to_string()), None)),
            },
        }
    }

    /// Race detection after a committed write. Anything found is reported, never rolled back.
    pub(super) async fn post_write_check(&self, operation: &'static str, written: &[Reservation]) {
        let checks = written.iter().map(|r| async move {
            let found =
                conflict::find_conflicts(self.store.as_ref(), &r.room, r.span(), Some(r.id)).await;
            (r, found)
        });
        for (r, found) in futures::future::join_all(checks).await {
            match found {
                Ok(hits) if hits.is_empty() => {}
                Ok(hits) => {
                    let ids: Vec<String> = hits.iter().map(|h| h.id.to_string()).collect();
                    tracing::warn!(
                        operation,
                        id = %r.id,
                        room = %r.room,
                        conflicting = ?ids,
                        "post-write check found overlapping reservations; write kept, reconcile manually"
                    );
                    metrics::counter!(observability::POST_WRITE_CONFLICTS_TOTAL)
                        .increment(hits.len() as u64);
                    self.audit.record(
                        AuditEvent::new(AuditLevel::Warning, operation, "post_write_conflict")
                            .message("overlap detected after write")
                            .details(json!({
                                "id": r.id,
                                "room": r.room,
                                "startTime": r.start_time,
                                "endTime": r.end_time,
                                "conflicting": ids,
                            })),
                    );
                }
                Err(e) => {
                    tracing::warn!(operation, id = %r.id, "post-write check failed: {e}");
                }
            }
        }
    }

    /// Audit + metrics for one finished operation: an outcome record and a timing record.
    pub(super) fn finish<T>(
        &self,
        operation: &'static str,
        started: Instant,
        details: Value,
        result: &Result<T, BookingError>,
    ) {
        let elapsed = started.elapsed();
        let (level, outcome, message) = match result {
            Ok(_) => (AuditLevel::Info, "ok", format!("{operation} succeeded")),
            Err(e @ BookingError::Storage(_)) => {
                (AuditLevel::Error, e.kind(), format!("{operation} failed: {e}"))
            }
            Err(e) => (AuditLevel::Warning, e.kind(), format!("{operation} rejected: {e}")),
        };
        observability::record_operation(operation, outcome, elapsed);
        self.audit.record(
            AuditEvent::new(level, operation, outcome)
                .message(message)
                .details(details),
        );
        self.audit.record(
            AuditEvent::new(AuditLevel::Debug, operation, outcome)
                .message(format!("{operation} took {elapsed:?}"))
                .duration(elapsed),
        );
    }
}

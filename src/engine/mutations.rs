use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth;
use crate::limits::*;
use crate::model::*;

use super::conflict::find_conflicts;
use super::store::{ListFilter, ReservationPatch, UpdateCondition};
use super::validate::{to_datetime, validate_span, validate_times, TimeInput};
use super::{BookingError, Engine};

/// `room` as clients send it: one key or a list of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomSelection {
    One(String),
    Many(Vec<String>),
}

impl RoomSelection {
    /// Trimmed, non-blank, de-duplicated room keys in request order.
    pub fn into_rooms(self) -> Vec<String> {
        let raw = match self {
            RoomSelection::One(room) => vec![room],
            RoomSelection::Many(rooms) => rooms,
        };
        let mut rooms: Vec<String> = Vec::with_capacity(raw.len());
        for room in raw {
            let room = room.trim();
            if !room.is_empty() && !rooms.iter().any(|r| r == room) {
                rooms.push(room.to_string());
            }
        }
        rooms
    }
}

impl From<&str> for RoomSelection {
    fn from(room: &str) -> Self {
        RoomSelection::One(room.to_string())
    }
}

impl From<Vec<&str>> for RoomSelection {
    fn from(rooms: Vec<&str>) -> Self {
        RoomSelection::Many(rooms.into_iter().map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub title: Option<String>,
    pub user: Option<String>,
    pub room: Option<RoomSelection>,
    pub participants_num: Option<u32>,
    pub start_time: Option<TimeInput>,
    pub end_time: Option<TimeInput>,
    pub edit_password: Option<String>,
}

/// Partial update. Absent (or null) fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub title: Option<String>,
    pub user: Option<String>,
    pub room: Option<String>,
    pub participants_num: Option<u32>,
    pub start_time: Option<TimeInput>,
    pub end_time: Option<TimeInput>,
    pub edit_password: Option<String>,
    pub cancelled: Option<bool>,
}

impl UpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.user.is_none()
            && self.room.is_none()
            && self.participants_num.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.edit_password.is_none()
            && self.cancelled.is_none()
    }

    fn reschedules(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some() || self.room.is_some()
    }

    pub fn cancellation() -> Self {
        Self {
            cancelled: Some(true),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// One id per room, in request order.
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Updated {
    pub id: Uuid,
    pub updated_count: u32,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelinkReport {
    pub scanned: usize,
    pub relinked: usize,
    pub unresolved: Vec<Uuid>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), BookingError> {
    match value {
        Some(v) if v.len() > max => Err(BookingError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

impl Engine {
    pub async fn create(&self, req: CreateRequest) -> Result<Created, BookingError> {
        let started = Instant::now();
        let mut details = json!({
            "user": req.user,
            "room": req.room,
            "startTime": req.start_time,
            "endTime": req.end_time,
        });
        let result = self.create_inner(req).await;
        if let Ok(created) = &result {
            details["ids"] = json!(created.ids);
        }
        self.finish("create", started, details, &result);
        result
    }

    async fn create_inner(&self, req: CreateRequest) -> Result<Created, BookingError> {
        let CreateRequest {
            title,
            user,
            room,
            participants_num,
            start_time,
            end_time,
            edit_password,
        } = req;

        let rooms = room.map(RoomSelection::into_rooms).unwrap_or_default();
        let (user_raw, start_time, end_time) = match (non_blank(user), start_time, end_time) {
            (Some(u), Some(s), Some(e)) if !rooms.is_empty() => (u, s, e),
            (u, s, e) => {
                let mut missing = Vec::new();
                if u.is_none() {
                    missing.push("user");
                }
                if rooms.is_empty() {
                    missing.push("room");
                }
                if s.is_none() {
                    missing.push("startTime");
                }
                if e.is_none() {
                    missing.push("endTime");
                }
                return Err(BookingError::MissingFields(missing));
            }
        };

        let span = validate_times(&start_time, &end_time)?;

        let title = non_blank(title);
        let edit_password = non_blank(edit_password);
        check_len(title.as_deref(), MAX_TITLE_LEN, "title too long")?;
        check_len(Some(&user_raw), MAX_USER_INPUT_LEN, "user too long")?;
        check_len(edit_password.as_deref(), MAX_PASSWORD_LEN, "edit password too long")?;

        let (user, user_raw) = self.resolve_user(&user_raw).await?;

        if rooms.len() > MAX_ROOMS_PER_BOOKING {
            return Err(BookingError::LimitExceeded("too many rooms in one booking"));
        }
        for room in &rooms {
            self.check_room(room)?;
        }

        // All rooms or none: any collision rejects the whole booking.
        let checks = rooms
            .iter()
            .map(|room| find_conflicts(self.store.as_ref(), room, span, None));
        let conflicts: Vec<ConflictInfo> = futures::future::try_join_all(checks)
            .await?
            .iter()
            .flatten()
            .map(Reservation::conflict_info)
            .collect();
        if !conflicts.is_empty() {
            return Err(BookingError::Conflict(conflicts));
        }

        let now = Utc::now();
        let start = to_datetime(span.start)?;
        let end = to_datetime(span.end)?;
        let group_id = (rooms.len() > 1).then(Uuid::new_v4);
        let batch: Vec<Reservation> = rooms
            .iter()
            .map(|room| Reservation {
                id: Uuid::new_v4(),
                room: room.clone(),
                title: title.clone(),
                user: user.clone(),
                user_raw: user_raw.clone(),
                participants_num: participants_num.unwrap_or(0),
                start_time: start,
                end_time: end,
                status: ReservationStatus::Active,
                edit_password: edit_password.clone(),
                updated_count: 0,
                created_time: now,
                updated_time: None,
                group_id,
                linked_rooms: rooms.iter().filter(|r| *r != room).cloned().collect(),
            })
            .collect();
        let ids = batch.iter().map(|r| r.id).collect();

        self.store.insert_many(batch.clone()).await?;
        self.post_write_check("create", &batch).await;
        Ok(Created { ids })
    }

    /// Apply a partial update. `id` is taken as sent by the client; an
    /// unparsable id is simply not found.
    pub async fn update(
        &self,
        id: &str,
        password: Option<&str>,
        req: UpdateRequest,
    ) -> Result<Updated, BookingError> {
        self.update_as("update", id, password, req).await
    }

    /// Soft delete. Same password gate and audit path as `update`.
    pub async fn cancel(&self, id: &str, password: Option<&str>) -> Result<Updated, BookingError> {
        self.update_as("cancel", id, password, UpdateRequest::cancellation())
            .await
    }

    async fn update_as(
        &self,
        operation: &'static str,
        id: &str,
        password: Option<&str>,
        req: UpdateRequest,
    ) -> Result<Updated, BookingError> {
        let started = Instant::now();
        let details = json!({
            "id": id,
            "room": req.room,
            "startTime": req.start_time,
            "endTime": req.end_time,
            "cancelled": req.cancelled,
        });
        let result = self.update_inner(id, password, req).await;
        self.finish(operation, started, details, &result);
        result
    }

    async fn update_inner(
        &self,
        raw_id: &str,
        password: Option<&str>,
        req: UpdateRequest,
    ) -> Result<Updated, BookingError> {
        let id = Uuid::parse_str(raw_id.trim())
            .map_err(|_| BookingError::NotFound(raw_id.to_string()))?;
        let existing = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(id.to_string()))?;

        auth::authorize(&existing, password)?;

        if req.is_empty() {
            return Err(BookingError::EmptyUpdate);
        }
        if !existing.is_active() {
            return Err(BookingError::NotFound(id.to_string()));
        }

        let cancelling = req.cancelled == Some(true);
        let reschedule = !cancelling && req.reschedules();

        let start = match &req.start_time {
            Some(t) => t.parse("startTime")?,
            None => existing.start_time.timestamp_millis(),
        };
        let end = match &req.end_time {
            Some(t) => t.parse("endTime")?,
            None => existing.end_time.timestamp_millis(),
        };
        let span = validate_span(start, end)?;
        let room = match &req.room {
            Some(room) => {
                let room = room.trim();
                self.check_room(room)?;
                room.to_string()
            }
            None => existing.room.clone(),
        };

        if reschedule {
            let conflicts = find_conflicts(self.store.as_ref(), &room, span, Some(id)).await?;
            if !conflicts.is_empty() {
                return Err(BookingError::Conflict(
                    conflicts.iter().map(Reservation::conflict_info).collect(),
                ));
            }
        }

        // Only supplied fields are written, onto whatever the record holds at
        // write time. A reschedule writes the whole checked room/interval.
        let mut patch = ReservationPatch {
            participants_num: req.participants_num,
            touched_at: Some(Utc::now()),
            ..ReservationPatch::default()
        };
        if reschedule {
            patch.room = Some(room);
            patch.start_time = Some(to_datetime(span.start)?);
            patch.end_time = Some(to_datetime(span.end)?);
        }
        if let Some(title) = req.title {
            let title = non_blank(Some(title));
            check_len(title.as_deref(), MAX_TITLE_LEN, "title too long")?;
            patch.title = Some(title);
        }
        if let Some(user) = req.user {
            let raw = non_blank(Some(user)).ok_or(BookingError::MissingFields(vec!["user"]))?;
            check_len(Some(&raw), MAX_USER_INPUT_LEN, "user too long")?;
            patch.user = Some(self.resolve_user(&raw).await?);
        }
        if let Some(password) = req.edit_password {
            let password = non_blank(Some(password));
            check_len(password.as_deref(), MAX_PASSWORD_LEN, "edit password too long")?;
            patch.edit_password = Some(password);
        }
        if cancelling {
            patch.status = Some(ReservationStatus::Cancelled);
        }

        let next = self
            .store
            .patch_one(id, patch, UpdateCondition::Active)
            .await?
            .ok_or_else(|| BookingError::NotFound(id.to_string()))?;

        if reschedule {
            self.post_write_check("update", std::slice::from_ref(&next))
                .await;
        }
        Ok(Updated {
            id,
            updated_count: next.updated_count,
            cancelled: cancelling,
        })
    }

    /// Re-resolve reservations whose user is still raw text. Matches are
    /// rewritten in place, keeping the text in `user_raw`; this is a data fix,
    /// so `updated_count` is left alone.
    pub async fn relink_users(&self) -> Result<RelinkReport, BookingError> {
        let started = Instant::now();
        let result = self.relink_inner().await;
        let details = match &result {
            Ok(report) => json!({
                "scanned": report.scanned,
                "relinked": report.relinked,
                "unresolved": report.unresolved.len(),
            }),
            Err(_) => json!({}),
        };
        self.finish("relink_users", started, details, &result);
        result
    }

    async fn relink_inner(&self) -> Result<RelinkReport, BookingError> {
        let mut report = RelinkReport::default();
        for reservation in self.store.list(ListFilter::default()).await? {
            let UserRef::Raw(raw) = &reservation.user else {
                continue;
            };
            report.scanned += 1;
            let Some(user) = crate::users::resolve(self.users.as_ref(), raw).await? else {
                report.unresolved.push(reservation.id);
                continue;
            };
            let patch = ReservationPatch {
                user: Some((UserRef::Resolved(user), Some(raw.clone()))),
                ..ReservationPatch::default()
            };
            // A record whose user changed since the scan is left alone.
            let relinked = self
                .store
                .patch_one(reservation.id, patch, UpdateCondition::RawUser(raw.clone()))
                .await?;
            if relinked.is_some() {
                report.relinked += 1;
            }
        }
        Ok(report)
    }
}

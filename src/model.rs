use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unix milliseconds. All interval math happens in this unit.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// `{code, label}` pair used for departments and groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub label: String,
}

/// Canonical user record from the reference directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub department: Label,
    #[serde(default)]
    pub group: Label,
}

/// Who booked. `Raw` only exists for legacy records or the permissive user policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRef {
    Resolved(UserInfo),
    Raw(String),
}

impl UserRef {
    pub fn display_name(&self) -> &str {
        match self {
            UserRef::Resolved(u) => &u.name,
            UserRef::Raw(s) => s,
        }
    }
}

/// Active → Cancelled, and Cancelled is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
}

/// A persisted reservation for exactly one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub room: String,
    pub title: Option<String>,
    pub user: UserRef,
    /// Free-text identifier the user reference was resolved from.
    pub user_raw: Option<String>,
    pub participants_num: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ReservationStatus,
    pub edit_password: Option<String>,
    pub updated_count: u32,
    pub created_time: DateTime<Utc>,
    pub updated_time: Option<DateTime<Utc>>,
    /// Shared by every room of one multi-room booking.
    pub group_id: Option<Uuid>,
    /// Sibling room keys of the same booking (never includes `room`).
    pub linked_rooms: Vec<String>,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start_time.timestamp_millis(), self.end_time.timestamp_millis())
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Read-path projection. The edit password never leaves the engine.
    pub fn view(&self) -> ReservationView {
        ReservationView {
            id: self.id,
            room: self.room.clone(),
            title: self.title.clone(),
            user: UserView::from(&self.user),
            participants_num: self.participants_num,
            start_time: self.start_time,
            end_time: self.end_time,
            cancelled: !self.is_active(),
            updated_count: self.updated_count,
            created_time: self.created_time,
            updated_time: self.updated_time,
            group_id: self.group_id,
            linked_rooms: self.linked_rooms.clone(),
        }
    }

    pub fn conflict_info(&self) -> ConflictInfo {
        ConflictInfo {
            id: self.id,
            room: self.room.clone(),
            title: self.title.clone(),
            user: self.user.display_name().to_string(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// One interval entry in a room's index of active reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub id: Uuid,
    pub span: Span,
}

/// Active reservations of a single room, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct RoomIndex {
    pub intervals: Vec<Interval>,
}

impl RoomIndex {
    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Uuid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// WAL record format. Each variant is applied atomically on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// All reservations of one booking, committed together.
    ReservationsInserted { reservations: Vec<Reservation> },
    /// Full post-image of an updated (or cancelled) reservation.
    ReservationReplaced { reservation: Reservation },
}

// ── Read-path types ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UserView {
    Resolved(UserInfo),
    Raw(String),
}

impl From<&UserRef> for UserView {
    fn from(user: &UserRef) -> Self {
        match user {
            UserRef::Resolved(u) => UserView::Resolved(u.clone()),
            UserRef::Raw(s) => UserView::Raw(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub id: Uuid,
    pub room: String,
    pub title: Option<String>,
    pub user: UserView,
    pub participants_num: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cancelled: bool,
    pub updated_count: u32,
    pub created_time: DateTime<Utc>,
    pub updated_time: Option<DateTime<Utc>>,
    pub group_id: Option<Uuid>,
    pub linked_rooms: Vec<String>,
}

/// What a client needs to render "already booked by X from 10:00 to 11:00".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub id: Uuid,
    pub room: String,
    pub title: Option<String>,
    pub user: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::*;

    fn interval(start: Ms, end: Ms) -> Interval {
        Interval {
            id: Uuid::new_v4(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert_eq!(a.duration_ms(), 100);
    }

    #[test]
    fn span_containment_overlaps() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(outer.overlaps(&outer));
    }

    #[test]
    fn interval_ordering() {
        let mut idx = RoomIndex::default();
        idx.insert_interval(interval(300, 400));
        idx.insert_interval(interval(100, 200));
        idx.insert_interval(interval(200, 300));
        assert_eq!(idx.intervals[0].span.start, 100);
        assert_eq!(idx.intervals[1].span.start, 200);
        assert_eq!(idx.intervals[2].span.start, 300);
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut idx = RoomIndex::default();
        let items: Vec<Interval> = (0..3).map(|i| interval(i * 100, i * 100 + 50)).collect();
        for i in &items {
            idx.insert_interval(i.clone());
        }
        assert!(idx.remove_interval(items[1].id).is_some());
        assert_eq!(idx.intervals, vec![items[0].clone(), items[2].clone()]);
        assert!(idx.remove_interval(Uuid::new_v4()).is_none());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut idx = RoomIndex::default();
        idx.insert_interval(interval(100, 200));
        idx.insert_interval(interval(450, 600));
        idx.insert_interval(interval(1000, 1100));

        let query = Span::new(500, 800);
        let hits: Vec<_> = idx.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut idx = RoomIndex::default();
        idx.insert_interval(interval(100, 200));
        idx.insert_interval(interval(300, 400));
        let query = Span::new(200, 300);
        assert_eq!(idx.overlapping(&query).count(), 0);
    }

    #[test]
    fn overlapping_large_interval_spanning_query() {
        let mut idx = RoomIndex::default();
        idx.insert_interval(interval(0, 10_000));
        assert_eq!(idx.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let mut idx = RoomIndex::default();
        idx.insert_interval(interval(100, 201));
        assert_eq!(idx.overlapping(&Span::new(200, 300)).count(), 1);
    }

    #[test]
    fn view_strips_password_and_maps_status() {
        let mut r = fixtures::reservation("A101", 0, 1000);
        r.edit_password = Some("secret".into());
        r.status = ReservationStatus::Cancelled;
        let json = serde_json::to_value(r.view()).unwrap();
        assert!(json.get("editPassword").is_none());
        assert_eq!(json["cancelled"], serde_json::Value::Bool(true));
        assert_eq!(json["user"], serde_json::Value::String("fixture".into()));
        assert_eq!(json["room"], "A101");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let mut r = fixtures::reservation("A102", 1_000, 2_000);
        r.user = UserRef::Resolved(UserInfo {
            id: "123456".into(),
            name: "John".into(),
            extension: "5678".into(),
            department: Label::default(),
            group: Label::default(),
        });
        let event = Event::ReservationsInserted { reservations: vec![r] };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

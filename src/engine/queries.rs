use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use crate::model::*;

use super::conflict;
use super::store::ListFilter;
use super::{BookingError, Engine};

impl Engine {
    /// Active reservations of `room` overlapping `span`, minus `exclude`.
    /// Ordered by start time, then id.
    pub async fn find_conflicts(
        &self,
        room: &str,
        span: Span,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Reservation>, BookingError> {
        Ok(conflict::find_conflicts(self.store.as_ref(), room, span, exclude).await?)
    }

    /// Active reservations, optionally for one room, ordered by start time.
    pub async fn list_active(&self, room: Option<&str>) -> Result<Vec<ReservationView>, BookingError> {
        let started = Instant::now();
        let filter = ListFilter {
            room: room.map(str::to_string),
            active_only: true,
        };
        let result = self.list_views(filter).await;
        self.finish("list_active", started, list_details(room, &result), &result);
        result
    }

    /// Every reservation, cancelled ones included.
    pub async fn list_all(&self) -> Result<Vec<ReservationView>, BookingError> {
        let started = Instant::now();
        let result = self.list_views(ListFilter::default()).await;
        self.finish("list_all", started, list_details(None, &result), &result);
        result
    }

    /// Single reservation by id, password stripped.
    pub async fn get(&self, id: &str) -> Result<ReservationView, BookingError> {
        let id = Uuid::parse_str(id.trim()).map_err(|_| BookingError::NotFound(id.to_string()))?;
        self.store
            .get(id)
            .await?
            .map(|r| r.view())
            .ok_or_else(|| BookingError::NotFound(id.to_string()))
    }

    async fn list_views(&self, filter: ListFilter) -> Result<Vec<ReservationView>, BookingError> {
        let docs = self.store.list(filter).await?;
        Ok(docs.iter().map(Reservation::view).collect())
    }
}

fn list_details(
    room: Option<&str>,
    result: &Result<Vec<ReservationView>, BookingError>,
) -> serde_json::Value {
    json!({
        "room": room,
        "count": result.as_ref().map(Vec::len).unwrap_or(0),
    })
}

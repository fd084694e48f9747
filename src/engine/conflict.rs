use uuid::Uuid;

use crate::model::*;

use super::store::{ReservationStore, StoreError};

/// Keep the candidates that collide with `span`: active, not `exclude`, and
/// `existing.start < span.end && existing.end > span.start`.
pub(crate) fn overlapping_active(
    candidates: impl IntoIterator<Item = Reservation>,
    span: &Span,
    exclude: Option<Uuid>,
) -> Vec<Reservation> {
    let mut hits: Vec<Reservation> = candidates
        .into_iter()
        .filter(|r| r.is_active())
        .filter(|r| Some(r.id) != exclude)
        .filter(|r| r.span().overlaps(span))
        .collect();
    hits.sort_by_key(|r| (r.start_time, r.id));
    hits
}

/// Active reservations in `room` overlapping `span`. Read-only; reads current store state.
pub(crate) async fn find_conflicts(
    store: &dyn ReservationStore,
    room: &str,
    span: Span,
    exclude: Option<Uuid>,
) -> Result<Vec<Reservation>, StoreError> {
    let candidates = store.find_active_overlapping(room, span).await?;
    Ok(overlapping_active(candidates, &span, exclude))
}

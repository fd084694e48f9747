use crate::engine::BookingError;
use crate::model::Reservation;

/// Operator override for edit passwords. Accepted on every password-protected
/// reservation regardless of the stored value. Fixed on purpose; do not derive
/// or rotate it without telling the operators who rely on it.
pub const MASTER_EDIT_PASSWORD: &str = "87878787";

/// Gate for update/cancel. Reservations without a (non-empty) edit password are open.
pub fn authorize(reservation: &Reservation, supplied: Option<&str>) -> Result<(), BookingError> {
    let stored = match reservation.edit_password.as_deref() {
        None | Some("") => return Ok(()),
        Some(stored) => stored,
    };
    match supplied {
        Some(s) if s == stored || s == MASTER_EDIT_PASSWORD => Ok(()),
        _ => Err(BookingError::WrongPassword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::reservation;

    fn protected(password: Option<&str>) -> Reservation {
        let mut r = reservation("A101", 0, 1_000);
        r.edit_password = password.map(str::to_string);
        r
    }

    #[test]
    fn open_reservation_accepts_anything() {
        for stored in [None, Some("")] {
            let r = protected(stored);
            assert!(authorize(&r, None).is_ok());
            assert!(authorize(&r, Some("whatever")).is_ok());
        }
    }

    #[test]
    fn stored_password_must_match() {
        let r = protected(Some("s3cret"));
        assert!(authorize(&r, Some("s3cret")).is_ok());
        assert!(matches!(authorize(&r, Some("nope")), Err(BookingError::WrongPassword)));
        assert!(matches!(authorize(&r, None), Err(BookingError::WrongPassword)));
        assert!(matches!(authorize(&r, Some("")), Err(BookingError::WrongPassword)));
    }

    #[test]
    fn master_override_always_accepted() {
        let r = protected(Some("s3cret"));
        assert!(authorize(&r, Some(MASTER_EDIT_PASSWORD)).is_ok());
    }
}

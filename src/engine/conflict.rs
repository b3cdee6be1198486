use ulid::Ulid;

use crate::model::*;
use crate::window::Window;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// First active reservation in `existing` whose window overlaps `window`.
///
/// `exclude` skips a reservation's own record so an edit never conflicts with
/// what it replaces. Linear: a slot holds at most a day's worth of windows.
pub fn first_conflict<'a>(
    window: &Window,
    existing: impl IntoIterator<Item = &'a Reservation>,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    existing
        .into_iter()
        .filter(|r| r.is_active() && Some(r.id) != exclude)
        .find(|r| r.window.overlaps(window))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booked(start: &str, end: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            space_id: Ulid::new(),
            day: "2025-01-20".parse().unwrap(),
            window: Window::parse(start, end).unwrap(),
            status,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn finds_first_overlap_in_order() {
        let slot = vec![
            booked("08:00", "09:00", ReservationStatus::Confirmed),
            booked("09:30", "10:30", ReservationStatus::Pending),
            booked("10:30", "11:30", ReservationStatus::Confirmed),
        ];
        let hit = first_conflict(&Window::parse("09:00", "11:00").unwrap(), &slot, None).unwrap();
        assert_eq!(hit.id, slot[1].id);
    }

    #[test]
    fn skips_cancelled_and_excluded() {
        let slot = vec![
            booked("09:00", "10:00", ReservationStatus::Cancelled),
            booked("09:00", "10:00", ReservationStatus::Confirmed),
        ];
        let window = Window::parse("09:00", "10:00").unwrap();
        assert!(first_conflict(&window, &slot, Some(slot[1].id)).is_none());
        assert_eq!(first_conflict(&window, &slot, None).unwrap().id, slot[1].id);
    }

    #[test]
    fn boundaries_touching_is_free() {
        let slot = vec![
            booked("08:00", "09:00", ReservationStatus::Confirmed),
            booked("10:00", "11:00", ReservationStatus::Confirmed),
        ];
        assert!(first_conflict(&Window::parse("09:00", "10:00").unwrap(), &slot, None).is_none());
    }
}

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;
use crate::service::ReservationSource;

use super::{Engine, EngineError};

// ── Overlap shapes ────────────────────────────────────────────────

/// The ways an existing reservation can intersect a candidate stay.
///
/// Shapes are not mutually exclusive: a reservation for exactly the candidate
/// window both starts and ends inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapShape {
    /// `r.check_in` in `[w.check_in, w.check_out)`.
    StartsInside,
    /// `r.check_out` in `(w.check_in, w.check_out]`.
    EndsInside,
    /// `r.check_in < w.check_in` and `r.check_out > w.check_out`.
    Spans,
}

impl OverlapShape {
    pub const ALL: [OverlapShape; 3] = [
        OverlapShape::StartsInside,
        OverlapShape::EndsInside,
        OverlapShape::Spans,
    ];

    pub fn matches(self, window: &StayWindow, reservation: &ReservationWindow) -> bool {
        match self {
            OverlapShape::StartsInside => {
                reservation.check_in() >= window.check_in() && reservation.check_in() < window.check_out()
            }
            OverlapShape::EndsInside => {
                reservation.check_out() > window.check_in() && reservation.check_out() <= window.check_out()
            }
            OverlapShape::Spans => {
                reservation.check_in() < window.check_in() && reservation.check_out() > window.check_out()
            }
        }
    }

    /// All shapes `reservation` takes relative to `window`; empty if disjoint.
    pub fn classify(window: &StayWindow, reservation: &ReservationWindow) -> Vec<OverlapShape> {
        Self::ALL
            .into_iter()
            .filter(|shape| shape.matches(window, reservation))
            .collect()
    }
}

/// True iff the reservation takes at least one overlap shape. Touching
/// boundaries (`r.check_out == w.check_in`, `r.check_in == w.check_out`) do not.
pub fn intersects(window: &StayWindow, reservation: &ReservationWindow) -> bool {
    OverlapShape::ALL
        .iter()
        .any(|shape| shape.matches(window, reservation))
}

// ── Selector over the in-memory store ─────────────────────────────

#[async_trait]
impl ReservationSource for Engine {
    async fn select_overlapping(
        &self,
        property_id: Ulid,
        room_type_id: Ulid,
        window: &StayWindow,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<ReservationWindow>, EngineError> {
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rt.read().await;
        if guard.info.property_id != property_id {
            return Err(EngineError::NotFound(room_type_id));
        }
        let hits: Vec<ReservationWindow> = guard
            .overlapping(window, statuses)
            .map(|r| r.window)
            .collect();
        tracing::debug!(
            "selected {} overlapping reservations for room type {room_type_id} in {window}",
            hits.len()
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarDay;

    fn day(m: u32, d: u32) -> CalendarDay {
        CalendarDay::from_ymd(2026, m, d).unwrap()
    }

    fn jan(ci: u32, co: u32) -> StayWindow {
        StayWindow::new(day(1, ci), day(1, co)).unwrap()
    }

    #[test]
    fn starts_inside() {
        let w = jan(10, 13);
        assert_eq!(OverlapShape::classify(&w, &jan(12, 20)), vec![OverlapShape::StartsInside]);
        assert!(OverlapShape::StartsInside.matches(&w, &jan(10, 20)));
        assert!(!OverlapShape::StartsInside.matches(&w, &jan(13, 20)));
    }

    #[test]
    fn ends_inside() {
        let w = jan(10, 13);
        assert_eq!(OverlapShape::classify(&w, &jan(5, 11)), vec![OverlapShape::EndsInside]);
        assert!(OverlapShape::EndsInside.matches(&w, &jan(5, 13)));
        assert!(!OverlapShape::EndsInside.matches(&w, &jan(5, 10)));
    }

    #[test]
    fn spans_entire_window() {
        let w = jan(10, 13);
        assert_eq!(OverlapShape::classify(&w, &jan(8, 15)), vec![OverlapShape::Spans]);
        // Sharing an endpoint is not spanning.
        assert!(!OverlapShape::Spans.matches(&w, &jan(8, 13)));
        assert!(!OverlapShape::Spans.matches(&w, &jan(10, 15)));
    }

    #[test]
    fn identical_window_matches_two_shapes() {
        let w = jan(10, 13);
        assert_eq!(
            OverlapShape::classify(&w, &w),
            vec![OverlapShape::StartsInside, OverlapShape::EndsInside]
        );
        assert!(intersects(&w, &w));
    }

    #[test]
    fn touching_boundaries_do_not_intersect() {
        let w = jan(10, 13);
        assert!(!intersects(&w, &jan(7, 10)));
        assert!(!intersects(&w, &jan(13, 16)));
        assert!(OverlapShape::classify(&w, &jan(7, 10)).is_empty());
    }

    #[test]
    fn fully_outside_does_not_intersect() {
        let w = jan(10, 13);
        assert!(!intersects(&w, &jan(1, 5)));
        assert!(!intersects(&w, &jan(20, 25)));
    }

    #[test]
    fn shapes_agree_with_interval_overlap() {
        // Exhaustive over a small grid: the three-shape OR is exactly
        // `r.check_in < w.check_out && r.check_out > w.check_in`.
        let w = jan(10, 13);
        for ci in 5..18 {
            for co in (ci + 1)..19 {
                let r = jan(ci, co);
                let expected = r.check_in() < w.check_out() && r.check_out() > w.check_in();
                assert_eq!(intersects(&w, &r), expected, "reservation {r}");
            }
        }
    }
}

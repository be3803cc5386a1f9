use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Per-night occupancy of `window` by `reservations`.
///
/// Sweep line over clamped `[check_in, check_out)` deltas: +1 on the first
/// occupied night inside the window, -1 on the first free one. A reservation
/// occupies night `d` iff `check_in <= d < check_out`; anything outside the
/// window contributes nothing.
pub fn occupancy_histogram(window: &StayWindow, reservations: &[ReservationWindow]) -> Vec<NightBucket> {
    let nights = window.nights() as usize;
    let mut deltas: Vec<i64> = vec![0; nights + 1];

    for r in reservations {
        let start = r.check_in().max(window.check_in());
        let end = r.check_out().min(window.check_out());
        if start >= end {
            continue;
        }
        deltas[window.check_in().days_until(start) as usize] += 1;
        deltas[window.check_in().days_until(end) as usize] -= 1;
    }

    let mut booked: i64 = 0;
    window
        .days()
        .zip(deltas)
        .map(|(date, delta)| {
            booked += delta;
            NightBucket {
                date,
                booked_count: booked as u32,
            }
        })
        .collect()
}

/// Rooms left on every night of `window` given `total_rooms` of the type and
/// the reservations already selected as overlapping it.
///
/// The binding constraint is the tightest night: one sold-out night makes the
/// whole stay unavailable. Overbooking on record clamps to zero.
pub fn compute_availability(
    window: &StayWindow,
    total_rooms: u32,
    reservations: &[ReservationWindow],
) -> AvailabilityResult {
    assert!(
        window.check_in() < window.check_out(),
        "availability window must span at least one night: {window}"
    );

    let per_night: Vec<NightAvailability> = if total_rooms == 0 {
        window
            .days()
            .map(|date| NightAvailability {
                date,
                available_rooms: 0,
                total_rooms: 0,
            })
            .collect()
    } else {
        occupancy_histogram(window, reservations)
            .into_iter()
            .map(|bucket| NightAvailability {
                date: bucket.date,
                available_rooms: total_rooms.saturating_sub(bucket.booked_count),
                total_rooms,
            })
            .collect()
    };

    let min_available_rooms = per_night
        .iter()
        .map(|n| n.available_rooms)
        .min()
        .unwrap_or(0);

    AvailabilityResult {
        nights: per_night.len() as u32,
        per_night,
        min_available_rooms,
        is_available: min_available_rooms > 0,
    }
}

use chrono::NaiveDate;

use crate::model::*;

// ── Free-span algorithm ──────────────────────────────────────────

/// Free sub-spans of `window` on a room, given its restrictions.
pub fn free_spans(restrictions: &[RoomRestriction], window: &Span) -> Vec<Span> {
    let mut taken: Vec<Span> = restrictions
        .iter()
        .filter(|r| r.span.overlaps(window))
        .map(|r| r.span)
        .collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_intervals(&[*window], &taken)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Day-by-day occupancy of `[first, last]` for one room.
pub fn day_statuses(
    restrictions: &[RoomRestriction],
    first: NaiveDate,
    last: NaiveDate,
) -> Vec<DayStatus> {
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(|date| {
            let occupancy = restrictions
                .iter()
                .find(|r| r.span.contains_day(date))
                .map(|r| match r.kind {
                    RestrictionKind::Reservation { reservation_id } => {
                        Occupancy::Reserved { reservation_id }
                    }
                    RestrictionKind::OwnerBlock => Occupancy::Blocked {
                        restriction_id: r.id,
                    },
                });
            DayStatus { date, occupancy }
        })
        .collect()
}

//! Capacity enforcer
//!
//! Pure decision functions. The coordinator calls them inside its per-event
//! critical section; nothing here mutates state.

use rollcall_core::{
    validate_capacity, EventRecord, Membership, MembershipState, RollcallError, RollcallResult,
};

/// Free seats: `max(0, capacity - joined_count)`
#[inline]
pub fn compute_available(event: &EventRecord, joined_count: usize) -> u32 {
    (event.capacity as usize).saturating_sub(joined_count) as u32
}

/// Earliest-queued waitlisted membership, if any
pub fn select_promotion<'a, I>(waitlist: I) -> Option<&'a Membership>
where
    I: IntoIterator<Item = &'a Membership>,
{
    waitlist
        .into_iter()
        .filter_map(|m| m.waitlist_position().map(|p| (p, m)))
        .min_by_key(|(position, _)| *position)
        .map(|(_, m)| m)
}

/// State a fresh join is admitted into
///
/// `tail` is the largest waitlist position currently in use (0 when empty).
pub fn admit(event: &EventRecord, joined_count: usize, tail: u32) -> MembershipState {
    if compute_available(event, joined_count) > 0 {
        MembershipState::Joined
    } else {
        MembershipState::Waitlisted { position: tail + 1 }
    }
}

/// Whether a promotion may happen right now
///
/// Evaluated against the working set at the instant of each promotion.
#[inline]
pub fn may_promote(event: &EventRecord, joined_count: usize) -> bool {
    event.is_open && compute_available(event, joined_count) > 0
}

/// Validate a capacity update
///
/// Capacity may not drop below the current joined count; seated members
/// are never evicted.
pub fn plan_capacity_change(
    event: &EventRecord,
    joined_count: usize,
    new_capacity: u32,
) -> RollcallResult<u32> {
    validate_capacity(new_capacity)?;
    if (new_capacity as usize) < joined_count {
        return Err(RollcallError::InvalidRequest(format!(
            "capacity {} is below the {} joined members of {:?}",
            new_capacity, joined_count, event.id
        )));
    }
    Ok(new_capacity)
}

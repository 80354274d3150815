//! Multi-gang switches.
//!
//! All gangs share one integer attribute: bit N is gang N (0-indexed).

use super::raw_value;
use super::POWER;
use crate::protocol::AttributeMap;
use crate::protocol::Dpid;

/// Attribute holding the gang bitmask.
pub const BITMASK: Dpid = POWER;

/// Current bitmask in `state`, zero when unknown.
pub fn bitmask(state: &AttributeMap) -> u64 {
    state.get(&BITMASK).and_then(raw_value).unwrap_or(0)
}

pub fn gang_is_on(mask: u64, gang: u8) -> bool {
    1u64.checked_shl(gang.into()).is_some_and(|bit| mask & bit != 0)
}

/// Bitmask with `gang` switched, or `None` when nothing would change.
pub fn gang_update(current: u64, gang: u8, on: bool) -> Option<u64> {
    let bit = 1u64.checked_shl(gang.into())?;
    let next = if on { current | bit } else { current & !bit };
    (next != current).then_some(next)
}

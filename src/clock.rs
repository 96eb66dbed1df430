// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wall-clock seconds for creation timestamps, expiration, and retransmit
// deadlines. All protocol times in this crate are whole seconds since the
// Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::flags::ConditionFlags;

/// Current time in whole seconds.
///
/// A clock that reports a pre-epoch time yields 0 and raises
/// `UNRELIABLE_TIME`; callers treat 0 as "no usable time" the same way the
/// expiration checks treat `exprtime == 0` as "never expires".
pub(crate) fn now_secs(flags: &mut ConditionFlags) -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => {
            *flags |= ConditionFlags::UNRELIABLE_TIME;
            0
        }
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Soft-condition word accumulated across channel operations.
//
// Conditions are advisory: they are OR-ed into the caller's flags and never
// fail the call on their own. A single data-plane call can raise several at
// once (e.g. a DACS emission that both truncated its fills and observed a
// backwards custody ID).

use bitflags::bitflags;

bitflags! {
    /// Soft conditions reported alongside a call's result.
    ///
    /// Callers pass `&mut ConditionFlags`; operations OR conditions in and
    /// never clear bits, so one flags word can span several calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConditionFlags: u16 {
        /// Valid bundle, but the agent cannot comply with the standard.
        const NONCOMPLIANT      = 0x0001;
        /// A block in the bundle was not recognized and was skipped.
        const INCOMPLETE        = 0x0002;
        /// The system clock returned a suspicious value.
        const UNRELIABLE_TIME   = 0x0004;
        /// A gap between custody IDs exceeds the maximum encodable fill.
        const FILL_OVERFLOW     = 0x0008;
        /// A custody signal used all of its fill budget and was truncated.
        const TOO_MANY_FILLS    = 0x0010;
        /// A custody ID arrived smaller than one already aggregated.
        const CID_WENT_BACKWARDS = 0x0020;
        /// The loaded bundle must be routed before transmission.
        const ROUTE_NEEDED      = 0x0040;
        /// The storage service failed to deliver data.
        const STORE_FAILURE     = 0x0080;
        /// An acknowledgment named a custody ID with no tracked bundle.
        const UNKNOWN_CID       = 0x0100;
        /// A numeric value did not fit the variable it was read into.
        const SDNV_OVERFLOW     = 0x0200;
        /// A numeric value ran past the end of its block.
        const SDNV_INCOMPLETE   = 0x0400;
        /// The active table wrapped onto an in-flight custody ID.
        const ACTIVE_TABLE_WRAP = 0x0800;
        /// Multiple bundles on the network carry the same custody ID.
        const DUPLICATES        = 0x1000;
        /// The custody interval tree was full and forced an emission.
        const CUSTODY_TREE_FULL = 0x2000;
    }
}

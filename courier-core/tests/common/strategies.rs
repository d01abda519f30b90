// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies

use courier_core::MessageStatus;
use proptest::prelude::*;

/// Any delivery status.
pub fn status_strategy() -> impl Strategy<Value = MessageStatus> {
    prop::sample::select(MessageStatus::ALL.to_vec())
}

/// A sequence of receipts as they might arrive, in any order.
pub fn receipt_sequence_strategy() -> impl Strategy<Value = Vec<MessageStatus>> {
    prop::collection::vec(status_strategy(), 1..20)
}

/// Device sessions as `(user_id, session_id)` pairs, possibly repeated.
pub fn sessions_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("user-[a-c]", "s-[0-9]{1,2}"), 0..12)
}

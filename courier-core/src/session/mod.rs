// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signal sessions and message delivery.

mod deliver;
mod manager;

pub use deliver::{Deliverer, MessageResult};
pub use manager::SessionManager;

/// The signed-in account and this device's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user_id: String,
    pub session_id: String,
}

impl Account {
    pub fn new(user_id: &str, session_id: &str) -> Self {
        Account {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

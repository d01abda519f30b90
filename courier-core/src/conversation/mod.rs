// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conversation state: the REST port and checksum-conflict reconciliation.

pub mod api;
pub mod reconcile;

pub use api::{
    ApiError, AttachmentResponse, ConversationApi, ConversationRequest, ConversationResponse,
    HttpConversationApi, ParticipantRequest, ParticipantResponse, ParticipantSessionResponse,
};
pub use reconcile::{Reconciler, SyncOutcome};

// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Muster Event Bus — typed events from every pipeline stage.
//!
//! The EventBus is a `tokio::sync::broadcast` channel that carries
//! [`PipelineEvent`] values. Consumers (the CLI progress display, JSON
//! log output) subscribe independently. When no subscribers exist,
//! events are silently dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the pipeline emits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    // ── Acquisition Events ───────────────
    /// Sign-in state machine entered a new state.
    StateEntered { state: String },
    /// A bearer credential was captured.
    CredentialCaptured { correlator_present: bool },
    /// Sign-in failed; the pipeline will stop.
    AcquisitionFailed { kind: String, message: String },

    // ── Member Events ────────────────────
    /// Processing of one identifier began (`position` is 1-based).
    MemberStarted {
        identifier: String,
        position: usize,
        total: usize,
    },
    /// An identifier resolved to an internal identity.
    MemberResolved {
        identifier: String,
        display_name: String,
    },
    /// An identifier had no match upstream.
    MemberNotFound { identifier: String },
    /// Raw records were fetched for a member.
    MemberFetched { identifier: String, records: usize },
    /// A member-scoped failure; the batch continues.
    MemberFailed { identifier: String, reason: String },

    // ── Completion ───────────────────────
    /// The pipeline finished.
    PipelineComplete {
        members: usize,
        failed: usize,
        records: usize,
        elapsed_ms: u64,
    },
}

/// The central event bus.
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Muster runtime library — compliance reporting through a browser-issued session.
//!
//! One interactive sign-in yields a bearer credential harvested from the
//! portal's own traffic; the portal API is then queried member by member and
//! the raw training records are classified into canonical compliance records.

pub mod acquire;
pub mod api;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod events;
pub mod members;
pub mod pipeline;
pub mod renderer;

// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommand implementations for the `muster` binary.

pub mod doctor;
pub mod output;
pub mod report_cmd;

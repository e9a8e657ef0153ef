// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Global output flags and terminal styling.
//!
//! `main` records `--json`, `--quiet` and `--no-color` as
//! `MUSTER_*` environment variables so every command can check them.

use serde::Serialize;
use std::io::IsTerminal;

fn flag(name: &str) -> bool {
    std::env::var_os(name).is_some()
}

pub fn is_json() -> bool {
    flag("MUSTER_JSON")
}

pub fn is_quiet() -> bool {
    flag("MUSTER_QUIET")
}

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  Error: cannot serialize output: {e}"),
    }
}

/// ANSI styling, disabled when stderr is not a terminal or colour is turned off.
pub struct Styled {
    color: bool,
}

impl Styled {
    pub fn new() -> Self {
        let color = !flag("MUSTER_NO_COLOR") && !flag("NO_COLOR") && std::io::stderr().is_terminal();
        Self { color }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    pub fn ok_sym(&self) -> String {
        self.paint("32", "[OK]")
    }

    pub fn warn_sym(&self) -> String {
        self.paint("33", "[!!]")
    }

    pub fn fail_sym(&self) -> String {
        self.paint("31", "[XX]")
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}

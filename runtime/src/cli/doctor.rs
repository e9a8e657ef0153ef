// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment readiness check.

use crate::cli::output::{self, Styled};
use crate::config::{self, MusterConfig};
use crate::renderer::chromium::find_chromium;
use anyhow::Result;
use std::path::Path;

/// Check Chromium, configuration and operator credentials.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let s = Styled::new();

    let chromium = find_chromium();
    let resolved_path = config::resolve_config_path(config_path);
    let config = MusterConfig::load(config_path);
    let config_problem = match &config {
        Ok(c) => c.validate().err().map(|e| e.to_string()),
        Err(e) => Some(e.to_string()),
    };
    let operator = config::operator_credentials(None, |key| std::env::var(key).ok());
    let ready = chromium.is_some() && config_problem.is_none() && operator.is_ok();

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "chromium": chromium.as_ref().map(|p| p.display().to_string()),
            "config_path": resolved_path.as_ref().map(|p| p.display().to_string()),
            "config_error": config_problem,
            "operator_error": operator.as_ref().err().map(|e| e.to_string()),
            "ready": ready,
        }));
        return Ok(());
    }

    println!("Muster Doctor");
    println!("=============");
    println!();
    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    match &chromium {
        Some(path) => println!("{} Chromium found: {}", s.ok_sym(), path.display()),
        None => println!(
            "{} Chromium NOT found. Install Chrome or set MUSTER_CHROMIUM_PATH.",
            s.warn_sym()
        ),
    }

    match &resolved_path {
        Some(path) => println!("{} Config file: {}", s.ok_sym(), path.display()),
        None => println!("{} No config file; using defaults", s.dim("[--]")),
    }
    match (&config, &config_problem) {
        (Ok(c), None) => {
            println!("{} Portal: {}", s.ok_sym(), c.portal_url);
            println!("{} API:    {}", s.ok_sym(), c.api_url);
        }
        (_, Some(problem)) => println!("{} Config: {problem}", s.fail_sym()),
        (Err(_), None) => {}
    }

    match &operator {
        Ok(op) => println!("{} Operator: {}", s.ok_sym(), op.username),
        Err(e) => println!("{} Operator: {e}", s.warn_sym()),
    }

    println!();
    if ready {
        println!("Status: {}", s.bold("READY"));
    } else {
        println!("Status: {}", s.bold("NOT READY"));
    }

    Ok(())
}

// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! `muster report <IDS...>` — sign in once and report compliance for a batch.

use crate::acquire::SessionAcquirer;
use crate::api::PortalClient;
use crate::cli::output::{self, Styled};
use crate::compliance::CanonicalComplianceRecord;
use crate::config::{self, MusterConfig};
use crate::events::{EventBus, PipelineEvent};
use crate::pipeline::{CredentialStatus, PipelineCoordinator, PipelineOutcome, PipelineReport};
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, clap::Args)]
pub struct ReportArgs {
    /// Membership identifiers to report on
    pub identifiers: Vec<String>,

    /// Read further identifiers from a file (one per line, `#` comments)
    #[arg(long)]
    pub ids_file: Option<PathBuf>,

    /// Operator username (default: MUSTER_USERNAME)
    #[arg(long, short)]
    pub username: Option<String>,

    /// Mandatory requirement title. Repeat to replace the configured list.
    #[arg(long = "mandatory")]
    pub mandatory: Vec<String>,

    /// Reference date for status classification (default: today)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub as_of: Option<NaiveDate>,

    /// Show the browser window during sign-in
    #[arg(long)]
    pub headed: bool,
}

/// Parse an identifiers file: one per line, blank lines and `#` comments ignored.
pub fn parse_ids_file(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_identifiers(args: &ReportArgs) -> Result<Vec<String>> {
    let mut identifiers: Vec<String> = args
        .identifiers
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(path) = &args.ids_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        identifiers.extend(parse_ids_file(&text));
    }
    Ok(identifiers)
}

/// Run the report command.
pub async fn run(args: ReportArgs, config_path: Option<&Path>) -> Result<PipelineOutcome> {
    let config = MusterConfig::load(config_path)?;
    let settings = config.acquirer_settings()?;
    let identifiers = collect_identifiers(&args)?;
    if identifiers.is_empty() {
        bail!("no membership identifiers given");
    }
    let operator = config::operator_credentials(args.username.clone(), |key| {
        std::env::var(key).ok()
    })?;
    let mandatory = if args.mandatory.is_empty() {
        config.mandatory_requirements.clone()
    } else {
        args.mandatory.clone()
    };
    let as_of = args
        .as_of
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let renderer: Arc<dyn Renderer> = Arc::new(ChromiumRenderer::new(!args.headed)?);
    let client = PortalClient::new(
        &config.api_url,
        config.endpoints.clone(),
        config.request_timeout(),
    )?;

    let bus = Arc::new(EventBus::default());
    let progress = (!output::is_quiet() && !output::is_json()).then(|| spawn_progress(&bus));

    let acquirer = SessionAcquirer::new(renderer.clone(), settings).with_events(bus.clone());
    let coordinator = PipelineCoordinator::new(Arc::new(acquirer), Arc::new(client), mandatory)
        .with_events(bus.clone());

    tracing::info!(members = identifiers.len(), %as_of, "starting report");
    let report = coordinator.run(&operator, &identifiers, as_of).await;

    if let Some(handle) = progress {
        let _ = handle.await;
    }
    if let Err(e) = renderer.shutdown().await {
        tracing::debug!("renderer shutdown: {e}");
    }

    if output::is_json() {
        output::print_json(&report);
    } else {
        print_report(&report);
    }

    Ok(report.outcome())
}

/// Drive a spinner from pipeline events until the run completes.
fn spawn_progress(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("  {spinner} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Signing in...");

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match event {
                PipelineEvent::StateEntered { state } => {
                    pb.set_message(format!("Signing in ({state})"));
                }
                PipelineEvent::MemberStarted {
                    identifier,
                    position,
                    total,
                } => pb.set_message(format!("[{position}/{total}] {identifier}")),
                PipelineEvent::PipelineComplete { .. } => break,
                _ => {}
            }
        }
        pb.finish_and_clear();
    })
}

fn print_report(report: &PipelineReport) {
    let s = Styled::new();

    if let CredentialStatus::Failed { kind, message, .. } = &report.credential {
        eprintln!("  {} Sign-in failed ({kind}): {message}", s.fail_sym());
        return;
    }

    println!();
    println!("  Compliance as of {}", report.as_of);
    println!();

    for entry in &report.members {
        match &entry.identity {
            Some(identity) => println!("  {}  {}", s.bold(&entry.identifier), identity.display_name),
            None => println!("  {}  {}", s.bold(&entry.identifier), s.dim("(no record)")),
        }
        if let Some(failure) = &entry.failure {
            println!("      {} {failure}", s.warn_sym());
        }
        for record in report.records_for(&entry.identifier) {
            println!("      {}", record_line(record));
        }
    }

    println!();
    let summary: Vec<String> = report
        .summary()
        .into_iter()
        .map(|(status, n)| format!("{status}: {n}"))
        .collect();
    println!("  {}", summary.join("  "));

    match report.outcome() {
        PipelineOutcome::Partial { failed, total } => {
            println!("  {} {failed} of {total} members incomplete", s.warn_sym());
        }
        PipelineOutcome::Complete => println!("  {} all members reported", s.ok_sym()),
        PipelineOutcome::NoSession => {}
    }
}

fn record_line(record: &CanonicalComplianceRecord) -> String {
    let expiry = record
        .expiry_date
        .map(|d| format!("expires {d}"))
        .unwrap_or_default();
    format!(
        "{:<28} {:<12} {}",
        record.requirement_title,
        record.status.label(),
        expiry
    )
    .trim_end()
    .to_string()
}

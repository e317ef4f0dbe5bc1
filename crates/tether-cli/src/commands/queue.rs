use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_core::queue::{DrainReport, QueueStore, QueuedRequest};
use tether_core::HttpMethod;

use crate::cli::QueueCommands;
use crate::commands::common::{format_relative_time, normalize_endpoint, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueuedRequestItem {
    pub id: String,
    pub method: HttpMethod,
    pub endpoint: String,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&QueuedRequest> for QueuedRequestItem {
    fn from(request: &QueuedRequest) -> Self {
        Self {
            id: request.id.to_string(),
            method: request.method,
            endpoint: request.endpoint.clone(),
            body: request
                .body
                .as_deref()
                .map(|body| String::from_utf8_lossy(body).into_owned()),
            created_at: request.created_at,
            attempts: request.attempts,
            last_attempt_at: request.last_attempt_at,
            last_error: request.last_error.clone(),
        }
    }
}

pub async fn run_queue(context: &Context, command: QueueCommands) -> Result<(), CliError> {
    match command {
        QueueCommands::List { json } => {
            let requests = context.queue_store()?.list()?;
            if json {
                let items = requests
                    .iter()
                    .map(QueuedRequestItem::from)
                    .collect::<Vec<_>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if requests.is_empty() {
                println!("Queue is empty");
            } else {
                for line in format_request_lines(&requests, Utc::now()) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        QueueCommands::Add {
            method,
            endpoint,
            body,
        } => {
            let method: HttpMethod = method.parse()?;
            let endpoint = normalize_endpoint(&endpoint)?;
            let request = QueuedRequest::new(endpoint, method, body.map(String::into_bytes));
            context.queue_store()?.insert(&request)?;
            println!("{}", request.id);
            Ok(())
        }
        QueueCommands::Drain { json } => {
            let report = context.queue()?.process_queue().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in format_drain_report(&report) {
                    println!("{line}");
                }
            }
            Ok(())
        }
    }
}

pub fn format_request_lines(requests: &[QueuedRequest], now: DateTime<Utc>) -> Vec<String> {
    requests
        .iter()
        .map(|request| {
            let mut line = format!(
                "{} {:<6} {}  attempts={}  queued {}",
                request.id,
                request.method.as_str(),
                request.endpoint,
                request.attempts,
                format_relative_time(request.created_at, now)
            );
            if let Some(error) = &request.last_error {
                let _ = write!(line, "  last_error={error}");
            }
            line
        })
        .collect()
}

pub fn format_drain_report(report: &DrainReport) -> Vec<String> {
    let mut lines = vec![format!(
        "sent={} retained={} deferred={} conflicts={} discarded={}",
        report.sent,
        report.retained,
        report.deferred,
        report.conflicts_resolved,
        report.discarded.len()
    )];
    if let Some(reason) = &report.halted {
        lines.push(format!("stopped early: {reason}"));
    }
    lines.extend(report.discarded.iter().map(|discarded| {
        format!(
            "discarded {} {} {} ({}, attempts={}): {}",
            discarded.id,
            discarded.method,
            discarded.endpoint,
            discarded.reason,
            discarded.attempts,
            discarded.last_error.as_deref().unwrap_or("no error recorded")
        )
    }));
    lines
}

//! `pulsedev watch`: a live tracker driven by stdin
//!
//! Each stdin line is one raw editor event (`{"type": "edit", "payload": {...}}`).
//! Notifications are written to stdout as JSON lines; the stop report is the
//! last line. EOF or Ctrl+C stops the tracker gracefully.

use std::sync::Arc;

use anyhow::{Context, Result};
use pulsedev_core::sync::{ApiClient, Backend};
use pulsedev_core::{tracker, Config, RawEvent, StatusSnapshot, StopReport};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

pub async fn run(config: Config, session_id: Option<String>, offline: bool) -> Result<()> {
    let backend: Option<Arc<dyn Backend>> = if offline || !config.backend.is_ready() {
        None
    } else {
        let client =
            ApiClient::new(config.backend.clone()).context("failed to create backend client")?;
        Some(Arc::new(client))
    };

    let mut handle =
        tracker::spawn(config, backend, session_id).context("failed to start tracker")?;
    let mut events = handle.subscribe();
    eprintln!("Session {} started. Reading events from stdin (Ctrl+C to stop).", handle.session_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping tracker");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawEvent>(&line) {
                    Ok(raw) => handle.capture(raw).context("tracker stopped unexpectedly")?,
                    Err(e) => {
                        tracing::warn!(line = line_no, error = %e, "Skipping malformed event");
                        eprintln!("line {}: skipping malformed event: {}", line_no, e);
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => emit(&event)?,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Notification stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let report = handle.stop().await.context("failed to stop tracker")?;

    // Notifications raised while draining
    while let Ok(event) = events.try_recv() {
        emit(&event)?;
    }

    emit(&Stopped {
        event: "stopped",
        report: &report,
        status: &handle.status(),
    })
}

#[derive(Serialize)]
struct Stopped<'a> {
    event: &'static str,
    #[serde(flatten)]
    report: &'a StopReport,
    status: &'a StatusSnapshot,
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("failed to encode notification")?;
    println!("{}", line);
    Ok(())
}

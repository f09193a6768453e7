//! Session log writer
//!
//! Appends every [`BankEvent`] of a session to `session.log`, one JSON
//! object per line. Runs as a background task subscribed to the
//! [`EventBus`](themebank_common::EventBus).

use chrono::Utc;
use serde_json::json;
use std::path::Path;
use themebank_common::{BankEvent, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Write events from `events` to `log_path` until the session finishes or
/// every sender is dropped.
///
/// Lagging behind the bus is recorded as a `Lagged` line; the writer keeps
/// going.
pub async fn run_session_log(
    mut events: broadcast::Receiver<BankEvent>,
    log_path: &Path,
) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    debug!(path = %log_path.display(), "Session log writer started");

    loop {
        let (line, finished) = match events.recv().await {
            Ok(event) => {
                let finished = matches!(event, BankEvent::SessionFinished { .. });
                (serde_json::to_string(&event)?, finished)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session log writer lagged behind the event bus");
                let line = json!({
                    "type": "Lagged",
                    "skipped": skipped,
                    "timestamp": Utc::now(),
                });
                (line.to_string(), false)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        if finished {
            break;
        }
    }

    debug!(path = %log_path.display(), "Session log writer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use themebank_common::events::SessionOutcome;
    use themebank_common::EventBus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_one_line_per_event_until_finished() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("s1").join("session.log");
        let bus = EventBus::new(16);
        let writer = {
            let rx = bus.subscribe();
            let log_path = log_path.clone();
            tokio::spawn(async move { run_session_log(rx, &log_path).await })
        };

        bus.emit_lossy(BankEvent::ScoringUnavailable {
            reason: "model missing".to_string(),
            timestamp: Utc::now(),
        });
        bus.emit_lossy(BankEvent::SessionFinished {
            session_id: "s1".to_string(),
            outcome: SessionOutcome::Completed,
            timestamp: Utc::now(),
        });

        writer.await.unwrap().unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "ScoringUnavailable");
        assert_eq!(lines[1]["type"], "SessionFinished");
        assert_eq!(lines[1]["outcome"], "completed");
    }

    #[tokio::test]
    async fn test_lag_is_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("session.log");
        let bus = EventBus::new(2);
        let rx = bus.subscribe();

        // Overflow the receiver before the writer starts reading
        for _ in 0..4 {
            bus.emit_lossy(BankEvent::ScoringUnavailable {
                reason: "x".to_string(),
                timestamp: Utc::now(),
            });
        }
        drop(bus);

        run_session_log(rx, &log_path).await.unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["type"], "Lagged");
        assert_eq!(first["skipped"], 2);
        assert_eq!(content.lines().count(), 3);
    }
}

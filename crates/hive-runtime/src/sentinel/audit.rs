//! Sentinel audit trail.
//!
//! Every verdict is appended to exactly one sink, chosen per
//! deployment via `AUDIT_SINK`:
//!
//! - **CSV** (`csv:<path>`): RFC-4180 rows, header written on create.
//!   Serialized behind a file mutex; intended for single-host runs.
//! - **Topic** (`topic:<name>`): each decision becomes a `checkpoint`
//!   event on a dedicated bus topic. This is the concurrency-safe
//!   variant preferred in production; ordering and fan-out are the
//!   bus's problem, which is what it is for.
//!
//! Audit failures are logged and never fail the tracked call: losing
//! one audit row must not take an agent down with it.

use crate::sentinel::Verdict;
use crate::SentinelError;
use chrono::{DateTime, Utc};
use hive_bus::MessageBus;
use hive_event::{CheckpointPayload, Envelope, Meta, Payload};
use hive_types::{AgentName, SessionId, TopicName};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Column order of the audit schema.
const CSV_HEADER: &str = "team_id,timestamp,agent,tokens,credits,wall_time_ms,tool,verdict";

/// One audit row.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Deployment/team identifier.
    pub team_id: String,
    /// Decision instant.
    pub timestamp: DateTime<Utc>,
    /// Agent the decision was about.
    pub agent: AgentName,
    /// Tokens in the tracked call.
    pub tokens: u64,
    /// Credits in the tracked call.
    pub credits: u64,
    /// Agent wall time at decision, ms.
    pub wall_time_ms: u64,
    /// Tool named by the tracked call.
    pub tool: String,
    /// The verdict returned.
    pub verdict: Verdict,
}

/// Where audit rows go.
pub enum AuditSink {
    /// Drop every record. For tests that do not care.
    Null,
    /// Append to a CSV file.
    Csv(CsvAudit),
    /// Publish `checkpoint` events on a bus topic.
    Topic(TopicAudit),
}

impl AuditSink {
    /// A sink that drops everything.
    #[must_use]
    pub fn null() -> Self {
        Self::Null
    }

    /// Opens (or creates) a CSV audit file.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::AuditIo`] when the file cannot be
    /// opened or the header cannot be written.
    pub fn csv(path: impl Into<PathBuf>) -> Result<Self, SentinelError> {
        CsvAudit::open(path.into()).map(Self::Csv)
    }

    /// Streams audit records as `checkpoint` events on `topic`.
    ///
    /// Must be called within a tokio runtime: a forwarder task is
    /// spawned to decouple the sentinel's synchronous critical section
    /// from the async publish.
    #[must_use]
    pub fn topic(bus: Arc<dyn MessageBus>, topic: TopicName, session: SessionId) -> Self {
        Self::Topic(TopicAudit::new(bus, topic, session))
    }

    /// Records one decision. Infallible by contract; failures are
    /// logged.
    pub fn record(&self, record: &AuditRecord) {
        match self {
            Self::Null => {}
            Self::Csv(csv) => csv.append(record),
            Self::Topic(topic) => topic.send(record),
        }
    }
}

/// CSV-file sink with RFC-4180 quoting.
pub struct CsvAudit {
    path: PathBuf,
    file: Mutex<File>,
}

impl CsvAudit {
    fn open(path: PathBuf) -> Result<Self, SentinelError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SentinelError::audit_io(&path, e))?;
            }
        }

        let fresh = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SentinelError::audit_io(&path, e))?;

        if fresh {
            writeln!(file, "{CSV_HEADER}").map_err(|e| SentinelError::audit_io(&path, e))?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the audit file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &AuditRecord) {
        let row = [
            csv_field(&record.team_id),
            csv_field(&record.timestamp.to_rfc3339()),
            csv_field(record.agent.as_str()),
            record.tokens.to_string(),
            record.credits.to_string(),
            record.wall_time_ms.to_string(),
            csv_field(&record.tool),
            csv_field(record.verdict.as_str()),
        ]
        .join(",");

        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{row}") {
            warn!(path = %self.path.display(), error = %e, "audit row lost");
        }
    }
}

/// RFC-4180 quoting: wrap when the field contains a comma, quote, or
/// newline; double any embedded quotes.
fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_owned()
    }
}

/// Bus-topic sink.
pub struct TopicAudit {
    tx: mpsc::UnboundedSender<Envelope>,
    session: SessionId,
}

impl TopicAudit {
    fn new(bus: Arc<dyn MessageBus>, topic: TopicName, session: SessionId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = bus.publish(&topic, event).await {
                    warn!(topic = %topic, error = %e, "audit event lost");
                }
            }
        });
        Self { tx, session }
    }

    fn send(&self, record: &AuditRecord) {
        let payload = Payload::Checkpoint(CheckpointPayload {
            agent: record.agent.clone(),
            credits_used: record.credits,
            tokens_used: record.tokens,
            wall_time_ms: record.wall_time_ms,
            tool: record.tool.clone(),
            verdict: record.verdict.as_str().to_owned(),
        });
        let meta = Meta::new(self.session.clone()).with_credits(record.credits);
        match Envelope::new(record.agent.clone(), payload, meta) {
            Ok(event) => {
                let _ = self.tx.send(event);
            }
            Err(e) => warn!(error = %e, "audit event could not be built"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(verdict: Verdict) -> AuditRecord {
        AuditRecord {
            team_id: "default".into(),
            timestamp: Utc::now(),
            agent: AgentName::new("tester").unwrap(),
            tokens: 100,
            credits: 5,
            wall_time_ms: 12,
            tool: "grep".into(),
            verdict,
        }
    }

    #[test]
    fn csv_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");

        {
            let sink = AuditSink::csv(&path).unwrap();
            sink.record(&record(Verdict::Allow));
        }
        {
            let sink = AuditSink::csv(&path).unwrap();
            sink.record(&record(Verdict::Warn));
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("allow"));
        assert!(lines[2].ends_with("warn"));
    }

    #[test]
    fn csv_quotes_embedded_commas_and_quotes() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[tokio::test]
    async fn topic_sink_emits_checkpoint_events() {
        use hive_bus::MemoryBus;

        let bus = Arc::new(MemoryBus::new());
        let topic = TopicName::new("audit");
        let sub = bus.subscribe(&topic, "auditor").await.unwrap();

        let sink = AuditSink::topic(bus.clone(), topic, SessionId::new("s"));
        sink.record(&record(Verdict::Checkpoint));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, hive_event::EventKind::Checkpoint);
        match event.payload {
            Payload::Checkpoint(p) => {
                assert_eq!(p.verdict, "checkpoint");
                assert_eq!(p.tool, "grep");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}

use std::path::{Path, PathBuf};

use serde::de::IgnoredAny;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::Diagnostic;
use crate::queue::QueueSender;

/// Why a source stopped before finishing all of its passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailure {
    /// The file could not be opened
    Unreadable,
    /// Reading failed part-way through the file
    ReadInterrupted,
}

/// Per-file tally, summed over every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub path: PathBuf,
    pub valid_lines: u64,
    pub malformed_lines: u64,
    pub failure: Option<SourceFailure>,
}

impl SourceReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            valid_lines: 0,
            malformed_lines: 0,
            failure: None,
        }
    }

    pub fn total_lines(&self) -> u64 {
        self.valid_lines + self.malformed_lines
    }
}

/// Streams the JSON lines of one file into the dispatch queue, `repeat` times over.
#[derive(Debug, Clone)]
pub struct LineSource {
    path: PathBuf,
    repeat: u32,
}

enum Flow {
    Continue,
    Stop,
}

impl LineSource {
    pub fn new(path: impl Into<PathBuf>, repeat: u32) -> Self {
        Self {
            path: path.into(),
            repeat: repeat.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run every pass, or stop early on cancellation, a closed queue or a
    /// file error.
    pub async fn run(
        self,
        payloads: QueueSender<String>,
        diagnostics: QueueSender<Diagnostic>,
        cancel: CancellationToken,
    ) -> SourceReport {
        let mut report = SourceReport::new(&self.path);

        for pass in 1..=self.repeat {
            if cancel.is_cancelled() {
                break;
            }
            let flow = self
                .scan(&mut report, &payloads, &diagnostics, &cancel)
                .await;
            debug!(path = %self.path.display(), pass, "pass finished");
            if let Flow::Stop = flow {
                break;
            }
        }

        debug!(
            path = %self.path.display(),
            valid = report.valid_lines,
            malformed = report.malformed_lines,
            failure = ?report.failure,
            "source finished"
        );
        report
    }

    /// One pass over the file.
    async fn scan(
        &self,
        report: &mut SourceReport,
        payloads: &QueueSender<String>,
        diagnostics: &QueueSender<Diagnostic>,
        cancel: &CancellationToken,
    ) -> Flow {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                report.failure = Some(SourceFailure::Unreadable);
                emit(
                    diagnostics,
                    Diagnostic::error(format!("Cannot open {}: {e}", self.path.display())),
                )
                .await;
                return Flow::Stop;
            }
        };

        let mut lines = BufReader::new(file).split(b'\n');
        let mut line_no: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Flow::Stop;
            }

            let raw = match lines.next_segment().await {
                Ok(Some(raw)) => raw,
                Ok(None) => return Flow::Continue,
                Err(e) => {
                    report.failure = Some(SourceFailure::ReadInterrupted);
                    emit(
                        diagnostics,
                        Diagnostic::error(format!(
                            "Cannot read {} to the end: {e}",
                            self.path.display()
                        )),
                    )
                    .await;
                    return Flow::Stop;
                }
            };
            line_no += 1;

            match into_payload(raw) {
                Ok(line) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Flow::Stop,
                        pushed = payloads.push(line) => {
                            if pushed.is_err() {
                                return Flow::Stop;
                            }
                        }
                    }
                    report.valid_lines += 1;
                }
                Err(line) => {
                    report.malformed_lines += 1;
                    emit(
                        diagnostics,
                        Diagnostic::warn(format!(
                            "Invalid JSON at line {line_no} of {}: {line}",
                            self.path.display()
                        )),
                    )
                    .await;
                }
            }
        }
    }
}

/// Strip the line terminator and validate. Returns the line either way;
/// `Err` when it is not a single well-formed JSON value.
fn into_payload(mut raw: Vec<u8>) -> Result<String, String> {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(line) if is_valid_json(&line) => Ok(line),
        Ok(line) => Err(line),
        Err(e) => Err(String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}

/// Syntactic check only; the value itself is thrown away.
pub fn is_valid_json(line: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(line).is_ok()
}

async fn emit(diagnostics: &QueueSender<Diagnostic>, diagnostic: Diagnostic) {
    if diagnostics.push(diagnostic).await.is_err() {
        debug!("diagnostics queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Level;
    use crate::queue::{self, QueueReceiver};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    async fn drain<T>(rx: &QueueReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = rx.pop().await {
            out.push(item);
        }
        out
    }

    async fn run_source(
        source: LineSource,
        cancel: CancellationToken,
    ) -> (SourceReport, Vec<String>, Vec<Diagnostic>) {
        let (payload_tx, payload_rx) = queue::bounded(1024);
        let (diag_tx, diag_rx) = queue::bounded(1024);
        let report = source.run(payload_tx, diag_tx, cancel).await;
        (report, drain(&payload_rx).await, drain(&diag_rx).await)
    }

    #[test]
    fn json_validation() {
        assert!(is_valid_json(r#"{"a":1}"#));
        assert!(is_valid_json("[1, 2, 3]"));
        assert!(is_valid_json("  42 "));
        assert!(is_valid_json("\"text\""));
        assert!(!is_valid_json("not json"));
        assert!(!is_valid_json(""));
        assert!(!is_valid_json(r#"{"a":1} {"b":2}"#));
        assert!(!is_valid_json(r#"{"a":"#));
    }

    #[tokio::test]
    async fn valid_and_malformed_lines_add_up() {
        let file = write_lines(&[r#"{"a":1}"#, "not json", r#"{"b":2}"#, "", "[true]"]);
        let source = LineSource::new(file.path(), 1);

        let (report, payloads, diagnostics) = run_source(source, CancellationToken::new()).await;

        assert_eq!(report.valid_lines, 3);
        assert_eq!(report.malformed_lines, 2);
        assert_eq!(report.total_lines(), 5);
        assert_eq!(report.failure, None);
        assert_eq!(payloads, vec![r#"{"a":1}"#, r#"{"b":2}"#, "[true]"]);

        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.level == Level::Warn));
        assert!(diagnostics[0].message.contains("line 2"));
        assert!(diagnostics[0].message.contains("not json"));
        assert!(diagnostics[1].message.contains("line 4"));
    }

    #[tokio::test]
    async fn repeats_whole_file_in_order() {
        let file = write_lines(&["1", "2", "x"]);
        let source = LineSource::new(file.path(), 3);

        let (report, payloads, diagnostics) = run_source(source, CancellationToken::new()).await;

        assert_eq!(payloads, vec!["1", "2", "1", "2", "1", "2"]);
        assert_eq!(report.valid_lines, 6);
        assert_eq!(report.malformed_lines, 3);
        assert_eq!(diagnostics.len(), 3);
    }

    #[tokio::test]
    async fn crlf_and_invalid_utf8() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{\"a\":1}\r\n\xff\xfe\n").unwrap();
        let source = LineSource::new(file.path(), 1);

        let (report, payloads, diagnostics) = run_source(source, CancellationToken::new()).await;

        assert_eq!(payloads, vec![r#"{"a":1}"#]);
        assert_eq!(report.malformed_lines, 1);
        assert_eq!(diagnostics[0].level, Level::Warn);
    }

    #[tokio::test]
    async fn unreadable_file_stops_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let source = LineSource::new(&missing, 5);

        let (report, payloads, diagnostics) = run_source(source, CancellationToken::new()).await;

        assert_eq!(report.failure, Some(SourceFailure::Unreadable));
        assert_eq!(report.total_lines(), 0);
        assert!(payloads.is_empty());
        assert_eq!(diagnostics.len(), 1, "no retry per remaining pass");
        assert_eq!(diagnostics[0].level, Level::Error);
        assert!(diagnostics[0].message.contains("missing.json"));
    }

    #[tokio::test]
    async fn read_error_stops_remaining_passes() {
        // Opening a directory succeeds; reading from it does not
        let dir = tempfile::tempdir().unwrap();
        let source = LineSource::new(dir.path(), 3);

        let (report, payloads, diagnostics) = run_source(source, CancellationToken::new()).await;

        assert_eq!(report.failure, Some(SourceFailure::ReadInterrupted));
        assert!(payloads.is_empty());
        assert_eq!(diagnostics.len(), 1, "no retry per remaining pass");
        assert_eq!(diagnostics[0].level, Level::Error);
        assert!(diagnostics[0].message.contains("to the end"));
    }

    #[tokio::test]
    async fn cancellation_unblocks_full_queue() {
        let file = write_lines(&["1", "2", "3", "4"]);
        let source = LineSource::new(file.path(), 100);
        let (payload_tx, payload_rx) = queue::bounded(2);
        let (diag_tx, _diag_rx) = queue::bounded(2);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(source.run(payload_tx, diag_tx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("source exits after cancel")
            .unwrap();
        assert_eq!(report.valid_lines, 2);
        assert_eq!(drain(&payload_rx).await, vec!["1", "2"]);
    }
}

// ─── Console ───
// Bounded tail of a server's output plus one-time hints for well-known
// failure lines.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    Launcher,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchDiagnostic {
    EulaNotAccepted,
    PortInUse,
    UnsupportedJavaVersion,
}

pub fn detect_launch_diagnostic(line: &str) -> Option<LaunchDiagnostic> {
    if line.contains("You need to agree to the EULA") {
        return Some(LaunchDiagnostic::EulaNotAccepted);
    }
    if line.contains("FAILED TO BIND TO PORT") || line.contains("Address already in use") {
        return Some(LaunchDiagnostic::PortInUse);
    }
    if line.contains("UnsupportedClassVersionError") {
        return Some(LaunchDiagnostic::UnsupportedJavaVersion);
    }
    None
}

pub fn diagnostic_message(diagnostic: LaunchDiagnostic) -> &'static str {
    match diagnostic {
        LaunchDiagnostic::EulaNotAccepted => {
            "[DIAGNOSTIC] The server refused to start because its eula.txt is not accepted. Run `accept-eula` and launch again."
        }
        LaunchDiagnostic::PortInUse => {
            "[DIAGNOSTIC] The server could not bind its port. Another process is using it; pick a different SERVER_PORT."
        }
        LaunchDiagnostic::UnsupportedJavaVersion => {
            "[DIAGNOSTIC] The server jar needs a newer Java than the one it was started with. Set java_major on the catalog entry or configure a newer runtime."
        }
    }
}

/// Remove ANSI escape sequences and carriage returns.
pub fn strip_ansi(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek().copied() {
                Some('[') => {
                    chars.next();
                    // Parameter and intermediate bytes, then one final byte.
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if ('@'..='~').contains(&next) {
                            break;
                        }
                    }
                }
                Some(next) if ('@'..='_').contains(&next) => {
                    chars.next();
                }
                _ => {}
            },
            '\u{9b}' => {
                while let Some(next) = chars.next() {
                    if ('@'..='~').contains(&next) {
                        break;
                    }
                }
            }
            '\r' => {}
            c if ('\u{80}'..='\u{9f}').contains(&c) => {}
            c => out.push(c),
        }
    }
    out
}

struct ConsoleInner {
    lines: VecDeque<LogLine>,
    hints_emitted: HashSet<LaunchDiagnostic>,
}

/// Shared, bounded output buffer for one supervised server.
#[derive(Clone)]
pub struct ConsoleLog {
    label: Arc<str>,
    capacity: usize,
    inner: Arc<Mutex<ConsoleInner>>,
}

impl ConsoleLog {
    pub fn new(label: &str, capacity: usize) -> Self {
        Self {
            label: Arc::from(label),
            capacity: capacity.max(1),
            inner: Arc::new(Mutex::new(ConsoleInner {
                lines: VecDeque::new(),
                hints_emitted: HashSet::new(),
            })),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Record one raw output line. Matching diagnostics add a hint the
    /// first time they are seen.
    pub fn push(&self, stream: LogStream, raw: &str) {
        let text = strip_ansi(raw);
        match stream {
            LogStream::Stdout => info!("[mc:{}][stdout] {}", self.label, text),
            LogStream::Stderr => warn!("[mc:{}][stderr] {}", self.label, text),
            LogStream::Launcher => info!("[mc:{}] {}", self.label, text),
        }

        let diagnostic = detect_launch_diagnostic(&text);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.append(&mut inner, stream, text);

        if let Some(diagnostic) = diagnostic {
            if inner.hints_emitted.insert(diagnostic) {
                let message = diagnostic_message(diagnostic);
                error!("[mc:{}] {}", self.label, message);
                self.append(&mut inner, LogStream::Launcher, message.to_string());
            }
        }
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = inner.lines.len().saturating_sub(n);
        inner.lines.iter().skip(skip).cloned().collect()
    }

    fn append(&self, inner: &mut ConsoleInner, stream: LogStream, text: String) {
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(LogLine {
            stream,
            text,
            at: Utc::now(),
        });
    }
}

impl std::fmt::Debug for ConsoleLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleLog")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .finish()
    }
}

//! Operation tracking: turns a server-side long-running operation into a
//! blocking command that renders progress until a terminal state.
//!
//! # Design
//! - Status bodies are decoded once into [`OperationStatus`]; rendering and
//!   termination decisions only look at the decoded variant.
//! - Each tick is a single request; ticks never overlap.
//! - The wait can be cut short by a [`CancellationToken`] or an optional deadline.

use std::fmt::{self, Display, Formatter};
use std::io::{self, Write};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::ProgressArgs;
use crate::client::{AppContext, ApiClient, CliError, CliResult};
use crate::output::pretty_json;

pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Colon-delimited key of a server-side operation (`<action>:<scheduler>:<id>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OperationKey {
    raw: String,
    scheduler: String,
}

impl OperationKey {
    /// Validate a key; at least two segments are required and the second names the scheduler.
    pub(crate) fn parse(raw: &str) -> CliResult<Self> {
        let mut segments = raw.split(':');
        let _action = segments.next();
        match segments.next() {
            Some(scheduler) => Ok(Self {
                raw: raw.to_string(),
                scheduler: scheduler.to_string(),
            }),
            None => Err(CliError::InvalidOperationKey {
                key: raw.to_string(),
            }),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.raw
    }

    pub(crate) fn scheduler(&self) -> &str {
        &self.scheduler
    }
}

impl Display for OperationKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.raw)
    }
}

/// Decoded state of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OperationStatus {
    InProgress { operation: String, progress: String },
    Waiting { reason: String },
    Finished { success: bool, reason: Option<String> },
}

impl OperationStatus {
    fn spinner_text(&self) -> String {
        match self {
            Self::InProgress {
                operation,
                progress,
            } => format!("{operation} {progress}"),
            Self::Waiting { reason } => reason.clone(),
            Self::Finished { .. } => String::new(),
        }
    }
}

/// Classify a 200 status body.
///
/// Any `success` key is terminal; only a literal `false` marks failure. A
/// `description` mentioning a lock means the operation is queued behind another.
pub(crate) fn decode_status(body: &str) -> Result<OperationStatus, serde_json::Error> {
    let fields: Map<String, Value> = serde_json::from_str(body)?;

    if let Some(success) = fields.get("success") {
        let success = !matches!(success, Value::Bool(false));
        let reason = text_field(&fields, "reason")
            .or_else(|| text_field(&fields, "error"))
            .or_else(|| text_field(&fields, "description"));
        return Ok(OperationStatus::Finished { success, reason });
    }

    if let Some(description) = text_field(&fields, "description")
        && description.contains("lock")
    {
        return Ok(OperationStatus::Waiting {
            reason: description,
        });
    }

    Ok(OperationStatus::InProgress {
        operation: text_field(&fields, "operation").unwrap_or_default(),
        progress: text_field(&fields, "progress").unwrap_or_default(),
    })
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// One status poll: the URL hit, the HTTP status, and the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusSnapshot {
    pub(crate) url: String,
    pub(crate) status: StatusCode,
    pub(crate) body: String,
}

/// Source of operation status snapshots.
#[async_trait]
pub(crate) trait OperationStatusSource: Send + Sync {
    async fn fetch(&self, key: &OperationKey) -> CliResult<StatusSnapshot>;
}

#[async_trait]
impl OperationStatusSource for ApiClient {
    async fn fetch(&self, key: &OperationKey) -> CliResult<StatusSnapshot> {
        let url = self.endpoint(&[
            "scheduler",
            key.scheduler(),
            "operations",
            key.as_str(),
            "status",
        ])?;
        let response = self.execute(Method::GET, url).await?;
        Ok(StatusSnapshot {
            url: response.url,
            status: response.status,
            body: response.body,
        })
    }
}

/// A single rendering step of the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProgressFrame {
    Working { glyph: char, line: String },
    Succeeded { body: String },
    Failed { body: String },
    /// Closes an open spinner line when polling stops on an error.
    Aborted,
}

/// Sink for progress frames.
pub(crate) trait ProgressRenderer: Send {
    fn render(&mut self, frame: &ProgressFrame) -> io::Result<()>;
}

/// Renders frames on a terminal, overwriting the spinner line in place.
pub(crate) struct TerminalRenderer<W: Write + Send> {
    out: W,
    last_width: usize,
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub(crate) const fn new(out: W) -> Self {
        Self { out, last_width: 0 }
    }
}

impl<W: Write + Send> ProgressRenderer for TerminalRenderer<W> {
    fn render(&mut self, frame: &ProgressFrame) -> io::Result<()> {
        match frame {
            ProgressFrame::Working { glyph, line } => {
                let text = format!("[{glyph}] {line}");
                let width = text.chars().count();
                // pad over the tail of a longer previous line
                let pad = self.last_width.saturating_sub(width);
                write!(self.out, "\r{text}{:pad$}", "")?;
                self.last_width = width;
            }
            ProgressFrame::Succeeded { body } => {
                writeln!(self.out)?;
                writeln!(self.out, "{}", pretty_json(body))?;
                self.last_width = 0;
            }
            ProgressFrame::Failed { body } => {
                writeln!(self.out)?;
                writeln!(self.out, "{body}")?;
                self.last_width = 0;
            }
            ProgressFrame::Aborted => {
                writeln!(self.out)?;
                self.last_width = 0;
            }
        }
        self.out.flush()
    }
}

/// Polls an operation until it reaches a terminal state.
pub(crate) struct OperationPoller<S, R> {
    source: S,
    renderer: R,
    interval: Duration,
    cancel: CancellationToken,
    deadline: Option<Duration>,
    line_open: bool,
}

impl<S: OperationStatusSource, R: ProgressRenderer> OperationPoller<S, R> {
    pub(crate) fn new(source: S, renderer: R, cancel: CancellationToken) -> Self {
        Self {
            source,
            renderer,
            interval: DEFAULT_POLL_INTERVAL,
            cancel,
            deadline: None,
            line_open: false,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub(crate) fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Block until the operation finishes, returning the terminal body on success.
    pub(crate) async fn wait(&mut self, key: &OperationKey) -> CliResult<String> {
        let outcome = match self.deadline {
            Some(limit) => tokio::time::timeout(limit, self.poll_until_terminal(key))
                .await
                .unwrap_or_else(|_| {
                    Err(CliError::DeadlineExceeded {
                        key: key.to_string(),
                        after: limit,
                    })
                }),
            None => self.poll_until_terminal(key).await,
        };

        if outcome.is_err()
            && self.line_open
            && let Err(err) = self.emit(&ProgressFrame::Aborted)
        {
            debug!(error = %err.display_message(), "failed to close progress line");
        }
        outcome
    }

    async fn poll_until_terminal(&mut self, key: &OperationKey) -> CliResult<String> {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: usize = 0;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(CliError::Cancelled),
                _ = ticker.tick() => {}
            }

            let snapshot = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(CliError::Cancelled),
                fetched = self.source.fetch(key) => fetched?,
            };
            debug!(key = %key, status = snapshot.status.as_u16(), "operation status polled");

            if snapshot.status != StatusCode::OK {
                self.emit(&ProgressFrame::Failed {
                    body: snapshot.body.clone(),
                })?;
                return Err(CliError::RemoteStatus {
                    url: snapshot.url,
                    status: snapshot.status,
                    body: snapshot.body,
                });
            }

            let status = decode_status(&snapshot.body).map_err(|source| CliError::Decode {
                url: snapshot.url.clone(),
                source,
            })?;

            match status {
                OperationStatus::Finished { success: true, .. } => {
                    self.emit(&ProgressFrame::Succeeded {
                        body: snapshot.body.clone(),
                    })?;
                    info!(key = %key, "operation finished");
                    return Ok(snapshot.body);
                }
                OperationStatus::Finished {
                    success: false,
                    reason,
                } => {
                    self.emit(&ProgressFrame::Failed {
                        body: snapshot.body.clone(),
                    })?;
                    return Err(CliError::OperationFailed {
                        key: key.to_string(),
                        reason: reason.unwrap_or_else(|| "failed".to_string()),
                    });
                }
                pending => {
                    let glyph = SPINNER[tick % SPINNER.len()];
                    tick = tick.wrapping_add(1);
                    self.emit(&ProgressFrame::Working {
                        glyph,
                        line: pending.spinner_text(),
                    })?;
                }
            }
        }
    }

    fn emit(&mut self, frame: &ProgressFrame) -> CliResult<()> {
        self.line_open = matches!(frame, ProgressFrame::Working { .. });
        self.renderer
            .render(frame)
            .map_err(|err| CliError::failure(anyhow!("failed to render progress: {err}")))
    }
}

/// Cancellation token tripped by Ctrl-C.
pub(crate) fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

/// Poll an operation with the terminal renderer until it finishes.
pub(crate) async fn track_operation(
    api: ApiClient,
    key: &OperationKey,
    deadline: Option<Duration>,
) -> CliResult<String> {
    let renderer = TerminalRenderer::new(io::stdout());
    OperationPoller::new(api, renderer, interrupt_token())
        .with_deadline(deadline)
        .wait(key)
        .await
}

pub(crate) async fn handle_progress(ctx: &AppContext, args: ProgressArgs) -> CliResult<()> {
    let key = OperationKey::parse(&args.operation_key)?;
    let api = ctx.api()?;
    track_operation(api, &key, args.deadline_secs.map(Duration::from_secs)).await?;
    Ok(())
}

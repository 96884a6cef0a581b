//! Replay harness: decides request lines the way a frontend would.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, instrument, warn};

use super::request::RequestContext;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::AdmissionControl;

/// Status served when the connection is dropped without a response.
pub const STATUS_DROPPED: u16 = 444;

/// The decision for one replayed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// 1-based input line
    pub line: usize,
    pub client_ip: String,
    /// `VERB|resource`, empty if the line did not parse
    pub endpoint: String,
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Verdict {
    fn new(
        line: usize,
        request: &RequestContext,
        endpoint: String,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            line,
            client_ip: request.client_ip.clone(),
            endpoint,
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

/// Drives request lines through an [`AdmissionControl`] implementation.
pub struct ReplayHarness<A: AdmissionControl> {
    control: Arc<A>,
}

impl<A: AdmissionControl> Clone for ReplayHarness<A> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
        }
    }
}

impl<A: AdmissionControl> ReplayHarness<A> {
    pub fn new(control: Arc<A>) -> Self {
        Self { control }
    }

    /// Decide one request: hostile IP, then authorization, then rate limit.
    pub fn decide(&self, line: usize, request: &RequestContext) -> Verdict {
        let endpoint = self.control.endpoint_key(&request.verb, &request.resource);

        if self.control.is_ip_hostile(&request.client_ip) {
            debug!(client_ip = %request.client_ip, "Dropping request from hostile IP");
            return Verdict::new(
                line,
                request,
                endpoint,
                STATUS_DROPPED,
                "Hostile IP, connection dropped",
            );
        }

        let auth = self.control.check_user_auth(&request.user_auth);
        if !auth.is_accepted() {
            let message = auth.message().unwrap_or_default();
            return Verdict::new(line, request, endpoint, auth.status_code(), message);
        }

        let Some(identity) =
            self.control
                .resolve_identity(&request.client_ip, &request.user_auth, &endpoint)
        else {
            return Verdict::new(line, request, endpoint, 200, "Serviced, not rate limited");
        };

        match self.control.is_attempt_rate_limited(&identity) {
            None => Verdict::new(line, request, endpoint, 200, "Serviced"),
            Some(limited) => {
                let mut verdict = Verdict::new(line, request, endpoint, 429, limited.to_string());
                verdict.retry_after_secs = limited.retry_after_secs;
                verdict
            }
        }
    }
}

impl<A: AdmissionControl + 'static> ReplayHarness<A> {
    /// Read request lines from `reader` and decide each one on its own task.
    ///
    /// Blank lines and lines starting with `#` are skipped. Malformed lines
    /// get a 400 verdict. Verdicts are returned in input order.
    #[instrument(skip(self, reader))]
    pub async fn run<R>(&self, reader: R) -> Result<Vec<Verdict>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut tasks = Vec::new();
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let request = match RequestContext::parse(trimmed) {
                Ok(request) => request,
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping malformed request line");
                    let verdict = Verdict {
                        line: line_no,
                        client_ip: String::new(),
                        endpoint: String::new(),
                        status: 400,
                        message: e.to_string(),
                        retry_after_secs: None,
                    };
                    tasks.push(tokio::spawn(async move { verdict }));
                    continue;
                }
            };

            let harness = self.clone();
            let n = line_no;
            tasks.push(tokio::spawn(async move { harness.decide(n, &request) }));
        }

        let verdicts = join_all(tasks)
            .await
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TurnstileError::Task(e.to_string()))?;

        let limited = verdicts.iter().filter(|v| v.status == 429).count();
        info!(
            requests = verdicts.len(),
            limited = limited,
            "Replay complete"
        );

        Ok(verdicts)
    }
}

use std::{future::Future, time::Duration};

use bytes::Bytes;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{DriverConfig, ErrorPolicy},
    message::{Content, Envelope, ErrorReply, MessageId, ERROR, STREAM},
    Channel, DriverError,
};

/// How a round ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The text of the stream reply to this round's request.
    Output(String),
    /// An `error` message seen on the channel while waiting.
    KernelError(Box<Envelope>),
    /// A stream reply to this round's request without a usable `text`.
    MalformedReply(Box<Envelope>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    /// 1-based.
    pub round: usize,
    pub request_id: MessageId,
    pub outcome: RoundOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds: usize,
    pub outputs: usize,
    pub kernel_errors: usize,
    pub malformed_replies: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &RoundOutcome) {
        self.rounds += 1;
        match outcome {
            RoundOutcome::Output(_) => self.outputs += 1,
            RoundOutcome::KernelError(_) => self.kernel_errors += 1,
            RoundOutcome::MalformedReply(_) => self.malformed_replies += 1,
        }
    }
}

/// Sends `times` execute requests over one channel, one at a time, and waits
/// for the terminal reply of each before sending the next.
pub struct Driver<'a> {
    config: &'a DriverConfig,
    cancellation: CancellationToken,
}

impl<'a> Driver<'a> {
    pub fn new(config: &'a DriverConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub async fn run<C>(
        &self,
        channel: &mut C,
        reports: mpsc::UnboundedSender<RoundReport>,
    ) -> Result<RunSummary, DriverError>
    where
        C: Channel + ?Sized,
    {
        let mut summary = RunSummary::default();

        for round in 1..=self.config.times {
            let report = self.run_round(channel, round).await?;
            summary.record(&report.outcome);

            // Nobody listening for reports is not a reason to stop the run.
            let _ = reports.send(report);

            if should_pause(round, self.config.pause_every) {
                debug!(round, pause = ?self.config.pause, "pausing to spare the gateway");

                tokio::select! {
                    biased;

                    _ = self.cancellation.cancelled() => {
                        return Err(DriverError::Cancelled { round });
                    }
                    _ = sleep(self.config.pause) => {}
                }
            }
        }

        info!(
            rounds = summary.rounds,
            outputs = summary.outputs,
            kernel_errors = summary.kernel_errors,
            malformed_replies = summary.malformed_replies,
            "run finished"
        );

        Ok(summary)
    }

    async fn run_round<C>(&self, channel: &mut C, round: usize) -> Result<RoundReport, DriverError>
    where
        C: Channel + ?Sized,
    {
        let request = Envelope::execute_request(self.config.code.as_str(), &self.config.session);
        let request_id = request.message_id().to_string();

        info!(round, times = self.config.times, %request_id, "sending execute request");
        channel.send(Bytes::from(request.encode()?)).await?;

        let wait = await_terminal(channel, &request_id, self.config.error_policy);

        let outcome = tokio::select! {
            biased;

            _ = self.cancellation.cancelled() => {
                return Err(DriverError::Cancelled { round });
            }
            result = bounded(self.config.round_timeout, wait) => match result {
                Some(outcome) => outcome?,
                None => {
                    let limit = self.config.round_timeout.unwrap_or_default();
                    error!(round, %request_id, ?limit, "no terminal reply in time");
                    return Err(DriverError::Timeout { round, timeout: limit });
                }
            },
        };

        Ok(RoundReport {
            round,
            request_id,
            outcome,
        })
    }
}

/// True after every `every`-th completed round. `every == 0` never pauses.
pub fn should_pause(round: usize, every: usize) -> bool {
    every > 0 && round > 0 && round % every == 0
}

/// Decides whether `reply` ends the wait for `request_id`.
///
/// A matching `stream` reply ends it, with its text or as malformed when the
/// text is missing. An `error` reply ends it according to `policy`.
/// Everything else is discarded.
pub fn dispatch(reply: Envelope, request_id: &str, policy: ErrorPolicy) -> Option<RoundOutcome> {
    let is_current = reply.is_reply_to(request_id);

    if reply.message_type() == ERROR {
        if !policy.is_terminal(is_current) {
            debug!(parent = ?reply.parent_id(), "discarding error for another request");
            return None;
        }

        if let Content::Error(ErrorReply { ename, evalue, .. }) = &reply.content {
            warn!(%ename, %evalue, correlated = is_current, "kernel reported an error");
        } else {
            warn!(correlated = is_current, "kernel reported an error without details");
        }

        return Some(RoundOutcome::KernelError(Box::new(reply)));
    }

    if reply.message_type() == STREAM && is_current {
        if let Content::Stream(stream) = reply.content {
            return Some(RoundOutcome::Output(stream.text));
        }

        warn!(message_id = reply.message_id(), "stream reply has no text");
        return Some(RoundOutcome::MalformedReply(Box::new(reply)));
    }

    None
}

async fn await_terminal<C>(
    channel: &mut C,
    request_id: &str,
    policy: ErrorPolicy,
) -> Result<RoundOutcome, DriverError>
where
    C: Channel + ?Sized,
{
    loop {
        let frame = channel.recv().await?;

        let reply = match Envelope::decode(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, frame = %String::from_utf8_lossy(&frame), "malformed envelope");
                return Err(e.into());
            }
        };

        debug!(
            message_type = reply.message_type(),
            parent = reply.parent_id().unwrap_or_default(),
            "received message"
        );

        if let Some(outcome) = dispatch(reply, request_id, policy) {
            return Ok(outcome);
        }
    }
}

async fn bounded<F: Future>(limit: Option<Duration>, future: F) -> Option<F::Output> {
    match limit {
        Some(limit) => timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Header, Session, Stream};
    use googletest::prelude::*;
    use serde_json::Map;

    fn reply(message_type: &str, parent: Option<&str>, content: Content) -> Envelope {
        Envelope {
            header: Header {
                message_id: "reply".to_string(),
                message_type: message_type.to_string(),
                ..Header::default()
            },
            parent_header: parent.map(|id| Header {
                message_id: id.to_string(),
                ..Header::default()
            }),
            metadata: Map::new(),
            content,
            buffers: Vec::new(),
            channel: "iopub".to_string(),
        }
    }

    fn stream(text: &str) -> Content {
        Content::Stream(Stream {
            name: "stdout".to_string(),
            text: text.to_string(),
        })
    }

    #[googletest::test]
    fn pause_happens_on_multiples_of_thirty() {
        for round in [30, 60, 90] {
            expect_that!(should_pause(round, 30), eq(true));
        }
        for round in [0, 1, 15, 29, 31, 59] {
            expect_that!(should_pause(round, 30), eq(false));
        }
        expect_that!(should_pause(30, 0), eq(false));
    }

    #[googletest::test]
    fn matching_stream_is_terminal() {
        let outcome = dispatch(reply("stream", Some("q"), stream("hi")), "q", ErrorPolicy::AnyError);

        expect_that!(outcome, some(eq(RoundOutcome::Output("hi".to_string()))));
    }

    #[googletest::test]
    fn stream_for_another_request_is_discarded() {
        expect_that!(
            dispatch(reply("stream", Some("other"), stream("hi")), "q", ErrorPolicy::AnyError),
            none()
        );
        expect_that!(
            dispatch(reply("stream", None, stream("hi")), "q", ErrorPolicy::AnyError),
            none()
        );
    }

    #[googletest::test]
    fn matching_stream_without_text_ends_the_round_as_malformed() {
        let outcome = dispatch(
            reply("stream", Some("q"), Content::Unrecognized(Map::new())),
            "q",
            ErrorPolicy::AnyError,
        );

        expect_that!(outcome, some(pat!(RoundOutcome::MalformedReply(anything()))));
    }

    #[googletest::test]
    fn unrelated_stream_without_text_is_discarded() {
        let outcome = dispatch(
            reply("stream", Some("other"), Content::Unrecognized(Map::new())),
            "q",
            ErrorPolicy::AnyError,
        );

        expect_that!(outcome, none());
    }

    #[googletest::test]
    fn non_terminal_types_are_discarded() {
        let status = reply("status", Some("q"), Content::Unrecognized(Map::new()));
        let reply_msg = reply("execute_reply", Some("q"), Content::Unrecognized(Map::new()));

        expect_that!(dispatch(status, "q", ErrorPolicy::AnyError), none());
        expect_that!(dispatch(reply_msg, "q", ErrorPolicy::AnyError), none());
    }

    #[googletest::test]
    fn any_error_ends_the_round_by_default() {
        let unrelated = reply("error", Some("other"), Content::Error(ErrorReply::default()));

        expect_that!(
            dispatch(unrelated, "q", ErrorPolicy::AnyError),
            some(pat!(RoundOutcome::KernelError(anything())))
        );
    }

    #[googletest::test]
    fn correlated_policy_discards_unrelated_errors() {
        let unrelated = reply("error", Some("other"), Content::Error(ErrorReply::default()));
        let related = reply("error", Some("q"), Content::Error(ErrorReply::default()));

        expect_that!(dispatch(unrelated, "q", ErrorPolicy::Correlated), none());
        expect_that!(
            dispatch(related, "q", ErrorPolicy::Correlated),
            some(pat!(RoundOutcome::KernelError(anything())))
        );
    }

    #[googletest::test]
    fn summary_counts_outcomes() {
        let mut summary = RunSummary::default();
        let error = Envelope::execute_request("x", &Session::default());
        let malformed = Envelope::execute_request("y", &Session::default());

        summary.record(&RoundOutcome::Output("a".to_string()));
        summary.record(&RoundOutcome::KernelError(Box::new(error)));
        summary.record(&RoundOutcome::MalformedReply(Box::new(malformed)));
        summary.record(&RoundOutcome::Output("b".to_string()));

        expect_that!(
            summary,
            eq(RunSummary {
                rounds: 4,
                outputs: 2,
                kernel_errors: 1,
                malformed_replies: 1,
            })
        );
    }
}

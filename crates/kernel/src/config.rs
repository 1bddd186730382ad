use std::time::Duration;

use crate::message::Session;

pub const DEFAULT_HTTP_URL: &str = "http://localhost:8888";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8888";
pub const DEFAULT_PAUSE_EVERY: usize = 30;
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// How `error` replies are matched against the outstanding request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Any error on the channel ends the current round, whatever it replies to.
    #[default]
    AnyError,
    /// Only an error replying to the current request ends the round.
    Correlated,
}

impl ErrorPolicy {
    pub fn is_terminal(self, is_reply_to_current: bool) -> bool {
        match self {
            ErrorPolicy::AnyError => true,
            ErrorPolicy::Correlated => is_reply_to_current,
        }
    }
}

/// Everything the execution driver needs, resolved before the run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub code: String,
    pub times: usize,
    pub session: Session,
    pub error_policy: ErrorPolicy,
    /// Upper bound on one round's wait for a terminal reply. `None` waits forever.
    pub round_timeout: Option<Duration>,
    pub pause_every: usize,
    pub pause: Duration,
}

impl DriverConfig {
    pub fn new(code: impl Into<String>, times: usize) -> Self {
        Self {
            code: code.into(),
            times,
            session: Session::default(),
            error_policy: ErrorPolicy::default(),
            round_timeout: None,
            pause_every: DEFAULT_PAUSE_EVERY,
            pause: DEFAULT_PAUSE,
        }
    }
}

/// Process-level configuration: where the gateway is and which kernel to use.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub http_url: String,
    pub ws_url: String,
    pub language: String,
    /// Attach to this kernel instead of provisioning a new one.
    pub kernel_id: Option<String>,
    pub driver: DriverConfig,
}

impl ProbeConfig {
    pub fn channels_url(&self, kernel_id: &str) -> String {
        format!(
            "{}/api/kernels/{}/channels",
            self.ws_url.trim_end_matches('/'),
            kernel_id
        )
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_url: DEFAULT_HTTP_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            language: "python".to_string(),
            kernel_id: None,
            driver: DriverConfig::new("print('hello, world!')", 100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[googletest::test]
    fn defaults_match_gateway_conventions() {
        let config = ProbeConfig::default();

        expect_that!(config.http_url, eq("http://localhost:8888"));
        expect_that!(config.ws_url, eq("ws://localhost:8888"));
        expect_that!(config.language, eq("python"));
        expect_that!(config.kernel_id, none());
        expect_that!(config.driver.times, eq(100));
        expect_that!(config.driver.pause_every, eq(30));
        expect_that!(config.driver.round_timeout, none());
        expect_that!(config.driver.error_policy, eq(ErrorPolicy::AnyError));
    }

    #[googletest::test]
    fn channels_url_is_built_from_ws_base() {
        let config = ProbeConfig {
            ws_url: "ws://gateway:8888/".to_string(),
            ..ProbeConfig::default()
        };

        expect_that!(
            config.channels_url("k-1"),
            eq("ws://gateway:8888/api/kernels/k-1/channels")
        );
    }

    #[googletest::test]
    fn correlated_policy_only_accepts_matching_errors() {
        expect_that!(ErrorPolicy::AnyError.is_terminal(false), eq(true));
        expect_that!(ErrorPolicy::AnyError.is_terminal(true), eq(true));
        expect_that!(ErrorPolicy::Correlated.is_terminal(false), eq(false));
        expect_that!(ErrorPolicy::Correlated.is_terminal(true), eq(true));
    }
}

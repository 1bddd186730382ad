pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod driver;
pub mod message;
pub mod provision;

use thiserror::Error;

pub use channel::{Channel, WsChannel};
pub use config::{DriverConfig, ErrorPolicy, ProbeConfig};
pub use driver::{Driver, RoundOutcome, RoundReport, RunSummary};
pub use message::{Content, Envelope, Header, MessageId, Session};
pub use provision::{KernelId, Provisioner};

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("cannot decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("cannot encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("cannot connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("channel closed by peer")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("kernel request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("gateway response is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expecting a kernel id returned, but got {0}")]
    MissingId(serde_json::Value),
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("no terminal reply for round {round} within {timeout:?}")]
    Timeout {
        round: usize,
        timeout: std::time::Duration,
    },
    #[error("run cancelled during round {round}")]
    Cancelled { round: usize },
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("no kernel obtained: {0}")]
    Provision(#[from] ProvisionError),
    #[error("cannot connect to websocket: {0}")]
    Connect(#[from] ChannelError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

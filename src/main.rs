use std::time::Duration;

use clap::Parser;
use kgprobe_kernel::{
    bootstrap,
    config::{DEFAULT_HTTP_URL, DEFAULT_WS_URL},
    message::ErrorReply,
    BootstrapError, Content, DriverConfig, ErrorPolicy, ProbeConfig, RoundOutcome, RoundReport,
    Session, WsChannel,
};
use tokio::{sync::mpsc, task};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kgprobe")]
#[command(about = "Execute code repeatedly on a kernel gateway kernel")]
struct Cli {
    /// The code to execute on kernel.
    #[arg(long, default_value = "print('hello, world!')")]
    code: String,

    /// The kernel language if a new kernel will be created.
    #[arg(long, default_value = "python")]
    lang: String,

    /// The number of times to execute the code string.
    #[arg(long, default_value_t = 100)]
    times: usize,

    /// The id of an existing kernel to connect to. If not specified, a new
    /// kernel will be created.
    #[arg(long)]
    kernel_id: Option<String>,

    #[arg(long, env = "BASE_GATEWAY_HTTP_URL", default_value = DEFAULT_HTTP_URL)]
    http_url: String,

    #[arg(long, env = "BASE_GATEWAY_WS_URL", default_value = DEFAULT_WS_URL)]
    ws_url: String,

    /// Give up on a round after this many seconds without a terminal reply.
    #[arg(long)]
    round_timeout_secs: Option<u64>,

    /// Pause after every this many rounds. 0 disables pausing.
    #[arg(long, default_value_t = 30)]
    pause_every: usize,

    #[arg(long, default_value_t = 1000)]
    pause_ms: u64,

    /// Only end a round on errors replying to its own request.
    #[arg(long, default_value_t = false)]
    strict_errors: bool,
}

impl Cli {
    fn into_config(self) -> ProbeConfig {
        let error_policy = if self.strict_errors {
            ErrorPolicy::Correlated
        } else {
            ErrorPolicy::AnyError
        };

        ProbeConfig {
            http_url: self.http_url,
            ws_url: self.ws_url,
            language: self.lang,
            kernel_id: self.kernel_id.filter(|id| !id.is_empty()),
            driver: DriverConfig {
                code: self.code,
                times: self.times,
                session: Session::default(),
                error_policy,
                round_timeout: self.round_timeout_secs.map(Duration::from_secs),
                pause_every: self.pause_every,
                pause: Duration::from_millis(self.pause_ms),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BootstrapError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Cli::parse().into_config();
    info!(http_url = %config.http_url, ws_url = %config.ws_url, "using gateway");

    let cancellation = CancellationToken::new();
    let interrupt = cancellation.clone();
    task::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let (report_sender, report_receiver) = mpsc::unbounded_channel();
    let printer = task::spawn(print_reports(report_receiver, config.driver.times));

    let result = bootstrap::run(
        &config,
        |url| async move { WsChannel::connect(&url).await },
        report_sender,
        cancellation,
    )
    .await;

    if let Err(e) = printer.await {
        error!(error = %e, "report printer failed");
    }

    match &result {
        Ok(summary) => info!(?summary, "done"),
        Err(e) => error!(error = %e, "run aborted"),
    }

    result.map(|_| ())
}

async fn print_reports(mut reports: mpsc::UnboundedReceiver<RoundReport>, times: usize) {
    while let Some(report) = reports.recv().await {
        match report.outcome {
            RoundOutcome::Output(text) => {
                println!("[{}/{}] Content: {}", report.round, times, text.trim_end());
            }
            RoundOutcome::KernelError(envelope) => {
                match &envelope.content {
                    Content::Error(ErrorReply { ename, evalue, .. }) => {
                        println!("[{}/{}] ERROR {ename}: {evalue}", report.round, times);
                    }
                    _ => println!("[{}/{}] ERROR", report.round, times),
                }
                println!("{envelope:?}");
            }
            RoundOutcome::MalformedReply(envelope) => {
                println!("[{}/{}] MALFORMED stream reply", report.round, times);
                println!("{envelope:?}");
            }
        }
    }
}

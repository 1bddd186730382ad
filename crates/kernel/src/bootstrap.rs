use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    BootstrapError, Channel, ChannelError, Driver, ProbeConfig, Provisioner, RoundReport, RunSummary,
};

/// Obtains a kernel, opens its channel with `connect` and drives it.
///
/// A kernel is provisioned unless the config names one. When provisioning
/// fails nothing is connected and no round is run.
pub async fn run<C, F, Fut>(
    config: &ProbeConfig,
    connect: F,
    reports: mpsc::UnboundedSender<RoundReport>,
    cancellation: CancellationToken,
) -> Result<RunSummary, BootstrapError>
where
    C: Channel,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<C, ChannelError>>,
{
    let kernel_id = match &config.kernel_id {
        Some(id) => id.clone(),
        None => {
            let id = Provisioner::new(config.http_url.as_str())?
                .provision(&config.language)
                .await?;

            info!(kernel_id = %id, "created kernel, attach other clients with `kgprobe --kernel-id={id}`");
            id
        }
    };

    let mut channel = connect(config.channels_url(&kernel_id)).await?;

    let summary = Driver::new(&config.driver)
        .with_cancellation(cancellation)
        .run(&mut channel, reports)
        .await?;

    Ok(summary)
}

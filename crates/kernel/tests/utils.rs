#![allow(dead_code)]

use std::time::Duration;

use kgprobe_kernel::{DriverConfig, RoundReport};
use tokio::sync::mpsc;

pub fn quick_config(times: usize) -> DriverConfig {
    DriverConfig {
        pause: Duration::ZERO,
        ..DriverConfig::new("print('hello')", times)
    }
}

pub async fn take_all_reports(mut source: mpsc::UnboundedReceiver<RoundReport>) -> Vec<RoundReport> {
    let mut reports = Vec::new();
    while let Some(report) = source.recv().await {
        reports.push(report);
    }

    reports
}

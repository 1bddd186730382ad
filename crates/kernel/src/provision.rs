use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::ProvisionError;

pub type KernelId = String;

// The gateway in front of the kernels only checks that these are present.
const AUTH_USERNAME: &str = "fakeuser";
const AUTH_PASSWORD: &str = "fakepass";

/// Creates kernels through the gateway's REST API. Never retries.
pub struct Provisioner {
    base_url: String,
    client: reqwest::Client,
}

impl Provisioner {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub async fn provision(&self, language: &str) -> Result<KernelId, ProvisionError> {
        let url = format!("{}/api/kernels", self.base_url.trim_end_matches('/'));
        info!(%url, language, "requesting a new kernel");

        let response = self
            .client
            .post(&url)
            .header("auth_username", AUTH_USERNAME)
            .header("auth_password", AUTH_PASSWORD)
            .json(&json!({ "name": language }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(%status, %body, "gateway refused to create a kernel");
            return Err(ProvisionError::Status { status, body });
        }

        parse_kernel_id(&body)
    }
}

/// Extracts the kernel id from a kernel creation response body.
pub fn parse_kernel_id(body: &str) -> Result<KernelId, ProvisionError> {
    let response: Value = serde_json::from_str(body)?;

    match response.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ProvisionError::MissingId(response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[googletest::test]
    fn kernel_id_is_read_from_response() {
        expect_that!(
            parse_kernel_id(r#"{"id": "abc123", "name": "python"}"#),
            ok(eq("abc123"))
        );
    }

    #[googletest::test]
    fn missing_or_mistyped_id_is_rejected() {
        expect_that!(
            parse_kernel_id(r#"{"name": "python"}"#),
            err(pat!(ProvisionError::MissingId(anything())))
        );
        expect_that!(
            parse_kernel_id(r#"{"id": 7}"#),
            err(pat!(ProvisionError::MissingId(anything())))
        );
        expect_that!(
            parse_kernel_id(r#"{"id": ""}"#),
            err(pat!(ProvisionError::MissingId(anything())))
        );
    }

    #[googletest::test]
    fn invalid_json_is_rejected() {
        expect_that!(
            parse_kernel_id("<html>bad gateway</html>"),
            err(pat!(ProvisionError::Json(anything())))
        );
    }
}

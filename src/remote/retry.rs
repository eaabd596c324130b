use backon::{ExponentialBuilder, Retryable};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use crate::remote::UPSTREAM_BODY_PREVIEW_CHARS;

// Short, jittered retries for transient network faults and 5xx. Anything
// the remote rejects deliberately (4xx) passes through untouched; the
// worker's attempt accounting owns those.
static NETWORK_RETRY_POLICY: LazyLock<ExponentialBuilder> = LazyLock::new(|| {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_millis(300))
        .with_max_times(2)
        .with_jitter()
});

pub(crate) async fn post_json_with_retry<T>(
    client: &reqwest::Client,
    url: &Url,
    bearer: &str,
    body: &T,
) -> Result<reqwest::Response, reqwest::Error>
where
    T: serde::Serialize,
{
    (|| {
        let client = client.clone();
        let url = url.clone();
        let bearer = bearer.to_string();

        async move {
            let resp = client
                .post(url.clone())
                .bearer_auth(&bearer)
                .json(body)
                .send()
                .await?;

            if resp.status().is_server_error() {
                let status = resp.status();
                let err = resp.error_for_status_ref().unwrap_err();

                let body_preview = match resp.bytes().await {
                    Ok(bytes) => {
                        let raw_body = String::from_utf8_lossy(&bytes);
                        format!("{:.len$}", raw_body, len = UPSTREAM_BODY_PREVIEW_CHARS)
                    }
                    Err(e) => format!("<failed to read body: {e}>"),
                };

                tracing::debug!(
                    %status,
                    url = %url,
                    body = %body_preview,
                    "Upstream server error (will retry)"
                );

                return Err(err);
            }

            Ok(resp)
        }
    })
    .retry(*NETWORK_RETRY_POLICY)
    .await
}

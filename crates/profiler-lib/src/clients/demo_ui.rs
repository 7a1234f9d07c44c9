//! Client for the demo UI load generator, used by capture runs

use super::http::{endpoint, HttpClient};
use super::poll::{poll_until, PollConfig, PollStatus};
use super::slowcooker::SlowCookerResponse;
use super::DemoUi;
use crate::error::{ClientError, ClientResult};
use crate::runlog::RunLog;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

const STATE_RUNNING: &str = "running";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoUiLoadTest {
    pub app_name: String,
    pub load_time: String,
}

pub struct DemoUiClient {
    poll: PollConfig,
    http: HttpClient,
}

impl DemoUiClient {
    pub fn new(http: HttpClient) -> Self {
        Self::with_poll(PollConfig::from_secs(30, 90 * 60), http)
    }

    pub fn with_poll(poll: PollConfig, http: HttpClient) -> Self {
        Self { poll, http }
    }
}

#[async_trait]
impl DemoUi for DemoUiClient {
    async fn run_load_test(
        &self,
        url: &str,
        stage_id: &str,
        request: &DemoUiLoadTest,
        log: &RunLog,
    ) -> ClientResult<SlowCookerResponse> {
        let stage_url = endpoint(url, &format!("/loadtest/{}", stage_id))?;
        self.http
            .submit(Method::POST, stage_url.clone(), Some(request))
            .await?;
        log.info(format!("Started demo UI load test {}", stage_id));

        let http = &self.http;
        let what = format!("demo UI load test {}", stage_id);
        let response = poll_until("demo_ui", &what, self.poll, move || {
            let stage_url = stage_url.clone();
            async move {
                let response: SlowCookerResponse = http.poll_json(stage_url).await?;
                if !response.error.is_empty() {
                    return Err(ClientError::Remote(response.error));
                }
                if response.state == STATE_RUNNING {
                    Ok(PollStatus::Pending)
                } else {
                    Ok(PollStatus::Done(response))
                }
            }
        })
        .await?;

        log.info(format!("Demo UI load test {} finished", stage_id));
        Ok(response)
    }
}

//! Shared submit-then-poll task contract.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Connection parameters for one collaborator.
#[derive(Debug, Clone)]
pub struct TaskContract {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Service name for logging and errors
    pub service: &'static str,
    /// Delay between poll requests
    pub poll_interval: Duration,
    /// Overall deadline for one task
    pub timeout: Duration,
}

impl TaskContract {
    pub fn new(base_url: impl Into<String>, service: &'static str) -> Self {
        Self {
            base_url: base_url.into(),
            service,
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(600),
        }
    }

    /// Read `{VAR}_URL` style configuration from the environment.
    pub fn from_env(var: &str, service: &'static str) -> ClientResult<Self> {
        let base_url =
            std::env::var(var).map_err(|_| ClientError::config(format!("{var} not set")))?;
        Ok(Self::new(base_url, service))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Handle returned on task submission.
#[derive(Debug, Deserialize)]
struct TaskHandle {
    task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Poll envelope around a task result.
#[derive(Debug, Deserialize)]
struct TaskEnvelope<R> {
    status: TaskState,
    #[serde(default = "Option::default")]
    result: Option<R>,
    #[serde(default)]
    error: Option<String>,
}

/// Submit a task and poll it to completion.
pub async fn submit_and_poll<B, R>(
    client: &Client,
    contract: &TaskContract,
    path: &str,
    body: &B,
) -> ClientResult<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let submit_url = format!("{}{}", contract.base_url, path);
    let handle: TaskHandle = client
        .post(&submit_url)
        .json(body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    debug!(
        service = contract.service,
        task_id = %handle.task_id,
        "Submitted task"
    );

    let poll_url = format!("{}/{}", submit_url, handle.task_id);
    let started = tokio::time::Instant::now();

    loop {
        if started.elapsed() > contract.timeout {
            warn!(
                service = contract.service,
                task_id = %handle.task_id,
                "Task did not finish before deadline"
            );
            return Err(ClientError::Timeout {
                service: contract.service,
                timeout_secs: contract.timeout.as_secs(),
            });
        }

        let envelope: TaskEnvelope<R> = client
            .get(&poll_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match envelope.status {
            TaskState::Completed => {
                return envelope.result.ok_or_else(|| {
                    ClientError::invalid_response(
                        contract.service,
                        "completed task carried no result",
                    )
                });
            }
            TaskState::Failed => {
                return Err(ClientError::task_failed(
                    contract.service,
                    envelope
                        .error
                        .unwrap_or_else(|| "no error detail".to_string()),
                ));
            }
            TaskState::Queued | TaskState::Running => {
                tokio::time::sleep(contract.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn contract(server: &MockServer) -> TaskContract {
        TaskContract::new(server.uri(), "test-service")
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_secs(2))
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: u32,
    }

    #[tokio::test]
    async fn test_poll_until_completed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/op"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-1"})))
            .mount(&server)
            .await;

        // First poll sees the task running, second sees it completed.
        Mock::given(method("GET"))
            .and(path("/v1/op/t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/op/t-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "completed", "result": {"value": 7}})),
            )
            .mount(&server)
            .await;

        let client = Client::new();
        let answer: Answer = submit_and_poll(&client, &contract(&server), "/v1/op", &json!({}))
            .await
            .unwrap();
        assert_eq!(answer, Answer { value: 7 });
    }

    #[tokio::test]
    async fn test_failed_task_surfaces_detail() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/op"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/op/t-2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "failed", "error": "model overloaded"})),
            )
            .mount(&server)
            .await;

        let client = Client::new();
        let result: ClientResult<Answer> =
            submit_and_poll(&client, &contract(&server), "/v1/op", &json!({})).await;

        match result {
            Err(ClientError::TaskFailed { message, .. }) => {
                assert!(message.contains("model overloaded"));
            }
            other => panic!("expected TaskFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_completed_without_result_is_invalid() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/op"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-3"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/op/t-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "completed"})))
            .mount(&server)
            .await;

        let client = Client::new();
        let result: ClientResult<Answer> =
            submit_and_poll(&client, &contract(&server), "/v1/op", &json!({})).await;

        assert!(matches!(result, Err(ClientError::InvalidResponse { .. })));
        assert!(!result.unwrap_err().is_transient());
    }
}

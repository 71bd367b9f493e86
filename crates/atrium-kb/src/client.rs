//! REST client for the hosted question-answering knowledge base.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info, warn};

use atrium_core::{
    Error, KbEntry, KbQuery, KbUpdate, KnowledgeBase, OperationHandle, Result, ScoredAnswer,
};

use crate::config::KbConfig;
use crate::error::{to_atrium_error, KbErrorCode};
use crate::types::*;

/// Authoring API version path segment.
const AUTHORING_PATH: &str = "/qnamaker/v4.0";

/// Knowledge base client implementing [`KnowledgeBase`].
pub struct QnaMakerClient {
    client: Client,
    config: KbConfig,
}

impl QnaMakerClient {
    pub fn new(config: KbConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "kb",
            component = "client",
            authoring = %config.authoring_endpoint,
            runtime = %config.runtime_endpoint,
            environment = %config.environment,
            "Initializing knowledge base client"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        let config = KbConfig::from_env();
        config.validate()?;
        Self::new(config)
    }

    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    fn authoring_url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.config.authoring_endpoint.trim_end_matches('/'),
            AUTHORING_PATH,
            path
        )
    }

    fn authoring(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.authoring_url(path))
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
    }

    fn runtime(&self, kb_id: &str) -> RequestBuilder {
        let url = format!(
            "{}/qnamaker/knowledgebases/{}/generateAnswer",
            self.config.runtime_endpoint.trim_end_matches('/'),
            kb_id
        );
        self.client
            .post(url)
            .header("Authorization", format!("EndpointKey {}", self.config.endpoint_key))
    }

    /// Send and map non-success statuses through [`KbErrorCode`].
    async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| Error::Request(format!("{} request failed: {}", op, e)))?;

        let status = response.status();
        debug!(
            subsystem = "kb",
            component = "client",
            op,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Knowledge base call"
        );

        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|r| r.error.message)
            .unwrap_or(text);
        let code = KbErrorCode::from_status(status.as_u16());
        warn!(
            subsystem = "kb",
            component = "client",
            op,
            status = status.as_u16(),
            retryable = code.is_retryable(),
            error = %message,
            "Knowledge base call failed"
        );
        Err(to_atrium_error(
            code,
            &format!("{} returned {}: {}", op, status, message),
        ))
    }
}

#[async_trait]
impl KnowledgeBase for QnaMakerClient {
    async fn submit_update(&self, kb_id: &str, update: &KbUpdate) -> Result<OperationHandle> {
        let body = UpdateKbRequest::from(update);
        let response = self
            .send(
                "update",
                self.authoring(reqwest::Method::PATCH, &format!("/knowledgebases/{}", kb_id))
                    .json(&body),
            )
            .await?;

        let operation: OperationDto = response.json().await?;
        info!(
            subsystem = "kb",
            component = "client",
            op = "update",
            operation_id = %operation.operation_id,
            added = update.add.len(),
            updated = update.update.len(),
            deleted = update.delete.len(),
            "Knowledge base update submitted"
        );
        Ok(operation.into())
    }

    async fn operation_status(&self, operation_id: &str) -> Result<OperationHandle> {
        let response = self
            .send(
                "operation_status",
                self.authoring(
                    reqwest::Method::GET,
                    &format!("/operations/{}", operation_id),
                ),
            )
            .await?;
        let operation: OperationDto = response.json().await?;
        Ok(operation.into())
    }

    async fn publish(&self, kb_id: &str) -> Result<()> {
        self.send(
            "publish",
            self.authoring(reqwest::Method::POST, &format!("/knowledgebases/{}", kb_id)),
        )
        .await?;
        info!(subsystem = "kb", component = "client", op = "publish", "Knowledge base published");
        Ok(())
    }

    async fn query(&self, kb_id: &str, query: &KbQuery) -> Result<Vec<ScoredAnswer>> {
        let body = GenerateAnswerRequest::from(query);
        let response = self.send("generate_answer", self.runtime(kb_id).json(&body)).await?;
        let result: GenerateAnswerResponse = response.json().await?;

        debug!(
            subsystem = "kb",
            component = "client",
            op = "generate_answer",
            result_count = result.answers.len(),
            "Answers received"
        );
        Ok(result.answers.into_iter().map(ScoredAnswer::from).collect())
    }

    async fn download_entries(&self, kb_id: &str, source_name: &str) -> Result<Vec<KbEntry>> {
        let path = format!(
            "/knowledgebases/{}/{}/qna",
            kb_id, self.config.environment
        );
        let response = self
            .send(
                "download",
                self.authoring(reqwest::Method::GET, &path)
                    .query(&[("source", source_name)]),
            )
            .await?;
        let documents: QnaDocumentsResponse = response.json().await?;
        Ok(documents
            .qna_documents
            .into_iter()
            .map(KbEntry::from)
            .collect())
    }
}

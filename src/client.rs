use std::env;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::gateway::{Completion, CompletionGateway, CompletionRequest};
use crate::observability::{
    GATEWAY_REQUEST_DURATION, GATEWAY_REQUEST_ERRORS, GATEWAY_REQUESTS, STREAM_BYTES,
};
use crate::sse::process_sse;
use crate::types::{ChatCompletion, ModelList};

/// Environment variable holding the service credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for an OpenAI-compatible chat-completions service.
#[derive(Debug, Clone)]
pub struct ChatClient {
    api_key: String,
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl ChatClient {
    /// Create a new client.
    ///
    /// The API key can be provided directly or read from the `OPENAI_API_KEY` environment
    /// variable.  A missing or blank key is a configuration error, reported before any request
    /// is made.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with custom settings.
    ///
    /// `timeout` bounds connection establishment; response pacing is left to the caller.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_ENV).map_err(|_| {
                Error::configuration(format!(
                    "API key not provided and {API_KEY_ENV} environment variable not set"
                ))
            })?,
        };
        if api_key.trim().is_empty() {
            return Err(Error::configuration(format!("{API_KEY_ENV} is empty")));
        }
        HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            Error::configuration(format!("{API_KEY_ENV} contains invalid characters"))
        })?;

        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base_url = Url::parse(&base_url)?;

        let timeout = timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            api_key,
            client,
            base_url,
            timeout,
        })
    }

    /// The service root requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
            Error::configuration(format!("{API_KEY_ENV} contains invalid characters"))
        })?;
        headers.insert(header::AUTHORIZATION, auth);
        Ok(headers)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {}", e),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
        }
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status = response.status();
        let status_code = status.as_u16();

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ErrorDetail>,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            #[serde(rename = "type")]
            error_type: Option<String>,
            message: Option<String>,
            param: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let detail = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error);
        let error_type = detail.as_ref().and_then(|e| e.error_type.clone());
        let error_message = detail
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| error_body.clone());
        let error_param = detail.as_ref().and_then(|e| e.param.clone());

        match status_code {
            400 => Error::bad_request(error_message, error_param),
            401 => Error::authentication(error_message),
            403 => Error::permission(error_message),
            408 => Error::timeout(error_message, None),
            429 => Error::rate_limit(error_message, retry_after),
            500 => Error::internal_server(error_message, request_id),
            502..=504 => Error::service_unavailable(error_message, retry_after),
            _ => Error::api(status_code, error_type, error_message, request_id),
        }
    }

    async fn post_completion(&self, request: &CompletionRequest) -> Result<Response> {
        let url = self.endpoint("chat/completions")?;
        let mut headers = self.default_headers()?;
        if request.stream {
            headers.insert(
                header::ACCEPT,
                HeaderValue::from_static("text/event-stream"),
            );
        }

        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Send a conversation and wait for the whole reply.
    ///
    /// The text of the first choice is returned with surrounding whitespace removed.
    pub async fn send(&self, mut request: CompletionRequest) -> Result<String> {
        request.stream = false;
        let response = self.post_completion(&request).await?;
        let completion = response.json::<ChatCompletion>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })?;
        completion
            .text()
            .map(|text| text.trim().to_string())
            .ok_or_else(|| Error::serialization("Response contained no message content", None))
    }

    /// Send a conversation and receive the reply as a stream of text fragments.
    pub async fn stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<crate::gateway::FragmentStream> {
        request.stream = true;
        let response = self.post_completion(&request).await?;
        let bytes = response.bytes_stream().inspect(|chunk| {
            if let Ok(chunk) = chunk {
                STREAM_BYTES.count(chunk.len() as u64);
            }
        });
        Ok(Box::pin(process_sse(Box::pin(bytes))))
    }

    /// List the models available to the credential.
    pub async fn models(&self) -> Result<Vec<String>> {
        let url = self.endpoint("models")?;
        let response = self
            .client
            .get(url)
            .headers(self.default_headers()?)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        let list = response.json::<ModelList>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse model list: {}", e),
                Some(Box::new(e)),
            )
        })?;
        Ok(list.ids())
    }
}

#[async_trait::async_trait]
impl CompletionGateway for ChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        GATEWAY_REQUESTS.click();
        let start = Instant::now();
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "sending chat completion"
        );
        let result = if request.stream {
            self.stream(request).await.map(Completion::Stream)
        } else {
            self.send(request).await.map(Completion::Full)
        };
        GATEWAY_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            GATEWAY_REQUEST_ERRORS.click();
            tracing::warn!(error = %err, "chat completion request failed");
        }
        result
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.models().await
    }
}

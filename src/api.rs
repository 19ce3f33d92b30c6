//! HTTP client for the peer-review backend.
//!
//! One [`ApiClient`] wraps two `reqwest` clients: a regular one with the
//! configured request timeout for REST calls, and a streaming one with only
//! a connect timeout for `/api/process`, whose body can stay open for
//! minutes.

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::controller::Transport;
use crate::error::{ClientError, Result, ValidationError};
use crate::protocol::{
    ApiErrorBody, NewProvider, OcrResponse, ProcessRequest, PromptDraft, PromptTemplate, Provider,
    ProviderUpdate, SearchRequest, SearchResponse,
};
use crate::reassembler::ByteStream;

/// Reply of `GET /api/health`.
#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub status: String,
}

/// Reply of the mutating endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
struct MessageReply {
    #[serde(default)]
    message: String,
}

/// Longest error body quoted verbatim when it is not a `{detail}` envelope.
const MAX_RAW_DETAIL: usize = 300;

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    streaming: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base_url '{}': {e}", config.base_url)))?;
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        let streaming = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self {
            http,
            streaming,
            base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `base/api/<segments...>` with every segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::Config(format!("base_url {} cannot hold a path", self.base)))?;
            path.pop_if_empty().push("api");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn send_error(url: &Url, e: reqwest::Error) -> ClientError {
        if e.is_decode() {
            ClientError::Decode {
                url: url.to_string(),
                detail: e.to_string(),
            }
        } else {
            ClientError::Connect {
                url: url.to_string(),
                detail: e.to_string(),
            }
        }
    }

    /// Turn a non-2xx response into `ClientError::Http` carrying `detail`.
    async fn check(url: &Url, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(envelope) => envelope.message(),
            Err(_) if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
            Err(_) => body.chars().take(MAX_RAW_DETAIL).collect(),
        };
        Err(ClientError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            detail,
        })
    }

    async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
        let body = response.bytes().await.map_err(|e| Self::send_error(url, e))?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode {
            url: url.to_string(),
            detail: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Self::send_error(&url, e))?;
        let response = Self::check(&url, response).await?;
        Self::decode(&url, response).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<T> {
        let url = self.url(segments)?;
        debug!(%url, %method, "request");
        let mut request = self.http.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| Self::send_error(&url, e))?;
        let response = Self::check(&url, response).await?;
        Self::decode(&url, response).await
    }

    async fn mutate<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<String> {
        let reply: MessageReply = self.send_json(method, segments, body).await?;
        Ok(reply.message)
    }

    pub async fn health(&self) -> Result<Health> {
        self.get(&["health"]).await
    }

    // -- providers ------------------------------------------------------------

    pub async fn list_providers(&self) -> Result<Vec<Provider>> {
        self.get(&["providers"]).await
    }

    pub async fn add_provider(&self, provider: &NewProvider) -> Result<String> {
        self.mutate(reqwest::Method::POST, &["providers"], Some(provider)).await
    }

    pub async fn update_provider(&self, name: &str, update: &ProviderUpdate) -> Result<String> {
        self.mutate(reqwest::Method::PUT, &["providers", name], Some(update))
            .await
    }

    pub async fn delete_provider(&self, name: &str) -> Result<String> {
        self.mutate::<()>(reqwest::Method::DELETE, &["providers", name], None)
            .await
    }

    // -- prompt templates -----------------------------------------------------

    pub async fn list_prompts(&self) -> Result<Vec<PromptTemplate>> {
        self.get(&["prompts"]).await
    }

    pub async fn add_prompt(&self, draft: &PromptDraft) -> Result<String> {
        self.mutate(reqwest::Method::POST, &["prompts"], Some(draft)).await
    }

    pub async fn update_prompt(&self, id: i64, draft: &PromptDraft) -> Result<String> {
        let id = id.to_string();
        self.mutate(reqwest::Method::PUT, &["prompts", &id], Some(draft))
            .await
    }

    pub async fn delete_prompt(&self, id: i64) -> Result<String> {
        let id = id.to_string();
        self.mutate::<()>(reqwest::Method::DELETE, &["prompts", &id], None)
            .await
    }

    pub async fn activate_prompt(&self, id: i64) -> Result<String> {
        let id = id.to_string();
        self.mutate::<()>(reqwest::Method::POST, &["prompts", &id, "activate"], None)
            .await
    }

    // -- OCR and search -------------------------------------------------------

    /// Upload an image and return the recognized text.
    pub async fn ocr(&self, image: Vec<u8>, file_name: &str, mime: &str, ocr_model: &str) -> Result<String> {
        if ocr_model.trim().is_empty() {
            return Err(ValidationError::MissingOcrModel.into());
        }
        if image.is_empty() {
            return Err(ValidationError::MissingImage.into());
        }
        let url = self.url(&["ocr"])?;
        let part = Part::bytes(image)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| ClientError::Validation(ValidationError::NotAnImage(format!("{mime}: {e}"))))?;
        let form = Form::new()
            .part("file", part)
            .text("ocr_model", ocr_model.to_string());

        info!(%url, model = ocr_model, "uploading image for OCR");
        let response = self
            .http
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::send_error(&url, e))?;
        let response = Self::check(&url, response).await?;
        let reply: OcrResponse = Self::decode(&url, response).await?;
        Ok(reply.ocr_text)
    }

    pub async fn ocr_file(&self, path: &Path, ocr_model: &str) -> Result<String> {
        let bytes = std::fs::read(path)?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        if mime.type_() != mime_guess::mime::IMAGE {
            return Err(ValidationError::NotAnImage(mime.essence_str().to_string()).into());
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        self.ocr(bytes, &file_name, mime.essence_str(), ocr_model).await
    }

    /// Web search through the backend. `success: false` becomes an error.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let reply: SearchResponse = self
            .send_json(reqwest::Method::POST, &["search"], Some(request))
            .await?;
        if !reply.success {
            return Err(ClientError::Backend(
                reply.error.unwrap_or_else(|| "search failed".to_string()),
            ));
        }
        Ok(reply)
    }

    // -- process stream -------------------------------------------------------

    /// Open `POST /api/process` and hand back the raw body.
    pub async fn process_stream(&self, request: &ProcessRequest) -> Result<ByteStream> {
        let url = self.url(&["process"])?;
        info!(%url, models = request.selected_models.len(), "opening process stream");
        let response = self
            .streaming
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| Self::send_error(&url, e))?;
        let response = Self::check(&url, response).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::Transport(e.to_string())));
        Ok(Box::pin(body))
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn open_process_stream(&self, request: &ProcessRequest) -> Result<ByteStream> {
        self.process_stream(request).await
    }
}

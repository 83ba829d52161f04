//! JSON-over-HTTP client for an external generation service.
//!
//! Every adapter contract maps to one POST endpoint under `base_url`:
//! `/classify`, `/plan`, `/diagram`, `/image` and `/voiceover`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lector_core::adapters::{
    ClassifyRequest, DiagramRenderer, ImageLookup, PlanRequest, QuestionClassifier, SlidePlanner,
    VoiceoverSynthesizer,
};
use lector_core::errors::AdapterError;
use lector_core::lecture::{DiagramDirective, ImageDirective, SlideDraft};
use lector_core::protocol::Classification;

#[derive(Clone, Debug)]
pub struct HttpAdapterConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".into(),
            timeout: Duration::from_secs(120),
            api_key: None,
        }
    }
}

#[derive(Deserialize)]
struct PlanResponse {
    slides: Vec<SlideDraft>,
}

#[derive(Deserialize)]
struct DiagramResponse {
    code: String,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

#[derive(Serialize)]
struct VoiceoverRequest<'a> {
    transcript: &'a str,
}

/// Generation service client implementing all consumed adapter contracts.
#[derive(Clone)]
pub struct HttpGenerationClient {
    client: reqwest::Client,
    config: HttpAdapterConfig,
}

impl HttpGenerationClient {
    pub fn new(config: HttpAdapterConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdapterError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, AdapterError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status.as_u16(), body));
        }

        debug!(path, status = status.as_u16(), "adapter call succeeded");
        response
            .json::<Resp>()
            .await
            .map_err(|e| AdapterError::InvalidResponse(format!("{path}: {e}")))
    }

    fn map_transport(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout(self.config.timeout)
        } else {
            AdapterError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl QuestionClassifier for HttpGenerationClient {
    #[instrument(skip_all, fields(topic = %request.topic))]
    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification, AdapterError> {
        self.post("classify", request).await
    }
}

#[async_trait]
impl SlidePlanner for HttpGenerationClient {
    #[instrument(skip_all, fields(topic = %request.topic, cut = ?request.cut_index))]
    async fn plan(&self, request: &PlanRequest) -> Result<Vec<SlideDraft>, AdapterError> {
        let plan: PlanResponse = self.post("plan", request).await?;
        Ok(plan.slides)
    }
}

#[async_trait]
impl DiagramRenderer for HttpGenerationClient {
    async fn render(&self, directive: &DiagramDirective) -> Result<String, AdapterError> {
        let diagram: DiagramResponse = self.post("diagram", directive).await?;
        Ok(diagram.code)
    }
}

#[async_trait]
impl ImageLookup for HttpGenerationClient {
    async fn lookup(&self, directive: &ImageDirective) -> Result<String, AdapterError> {
        let image: UrlResponse = self.post("image", directive).await?;
        Ok(image.url)
    }
}

#[async_trait]
impl VoiceoverSynthesizer for HttpGenerationClient {
    async fn synthesize(&self, transcript: &str) -> Result<String, AdapterError> {
        let audio: UrlResponse = self.post("voiceover", &VoiceoverRequest { transcript }).await?;
        Ok(audio.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use lector_core::lecture::DiagramKind;
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> HttpGenerationClient {
        HttpGenerationClient::new(HttpAdapterConfig {
            base_url,
            timeout: Duration::from_secs(5),
            api_key: Some("secret".into()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn classify_round_trip() {
        let router = Router::new().route(
            "/classify",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["question"], "what is ATP?");
                Json(json!({"category": "simple", "response": "An energy carrier."}))
            }),
        );
        let c = client(serve(router).await);
        let verdict = c
            .classify(&ClassifyRequest {
                topic: "Cells".into(),
                history: vec![],
                question: "what is ATP?".into(),
            })
            .await
            .unwrap();
        assert_eq!(verdict.response(), "An energy carrier.");
    }

    #[tokio::test]
    async fn plan_and_assets() {
        let router = Router::new()
            .route(
                "/plan",
                post(|| async {
                    Json(json!({"slides": [
                        {"transcript": "t", "title": "One", "markdown": "m"}
                    ]}))
                }),
            )
            .route("/diagram", post(|| async { Json(json!({"code": "graph TD; A-->B"})) }))
            .route("/image", post(|| async { Json(json!({"url": "https://img/1.png"})) }))
            .route(
                "/voiceover",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["transcript"], "hello");
                    Json(json!({"url": "data:audio/mpeg;base64,AAAA"}))
                }),
            );
        let c = client(serve(router).await);

        let slides = c.plan(&PlanRequest::default()).await.unwrap();
        assert_eq!(slides[0].title, "One");

        let code = c
            .render(&DiagramDirective {
                kind: DiagramKind::Flowchart,
                description: "x".into(),
            })
            .await
            .unwrap();
        assert!(code.starts_with("graph"));

        let url = c
            .lookup(&ImageDirective {
                search_term: "cat".into(),
                description: "a cat".into(),
            })
            .await
            .unwrap();
        assert_eq!(url, "https://img/1.png");

        let audio = c.synthesize("hello").await.unwrap();
        assert!(audio.starts_with("data:"));
    }

    #[tokio::test]
    async fn status_errors_are_classified() {
        let router = Router::new()
            .route(
                "/plan",
                post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "no plan") }),
            )
            .route("/image", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }));
        let c = client(serve(router).await);

        let err = c.plan(&PlanRequest::default()).await.unwrap_err();
        assert!(matches!(err, AdapterError::GenerationFailed(ref b) if b == "no plan"));

        let err = c
            .lookup(&ImageDirective {
                search_term: "x".into(),
                description: "y".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let router = Router::new().route("/diagram", post(|| async { Json(json!({"nope": 1})) }));
        let c = client(serve(router).await);
        let err = c
            .render(&DiagramDirective {
                kind: DiagramKind::State,
                description: "x".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "invalid_response");
    }

    #[tokio::test]
    async fn unreachable_service_is_network_error() {
        let c = client("http://127.0.0.1:1".into());
        let err = c.synthesize("x").await.unwrap_err();
        assert!(matches!(err, AdapterError::Network(_) | AdapterError::Timeout(_)));
    }
}

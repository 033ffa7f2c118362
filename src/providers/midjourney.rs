//! MidJourney proxy adapter (submit + poll)
//!
//! Jobs are asynchronous: `/mj/submit/imagine` returns a task id and
//! `/mj/task/{id}/fetch` reports progress as a percentage string. The
//! bounded poll loop lives in [`crate::imagine`].

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::MidJourneyConfig;
use crate::error::{PolychatError, Result};

use super::{ImagineRequest, ImagineTask};

const CODE_SUBMITTED: i32 = 1;
const CODE_QUEUED: i32 = 22;

#[derive(Debug, Serialize)]
struct SubmitRequest {
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    code: i32,
    #[serde(default)]
    description: String,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    id: String,
    #[serde(default)]
    progress: String,
    image_url: Option<String>,
    fail_reason: Option<String>,
}

/// Fold the structured request into MidJourney's single prompt string
fn full_prompt(req: &ImagineRequest) -> String {
    let mut prompt = req.prompt.clone();
    if let Some(neg) = req.negative_prompt.as_deref().filter(|n| !n.is_empty()) {
        prompt.push_str(" --no ");
        prompt.push_str(neg);
    }
    if req.width != req.height && req.height != 0 {
        prompt.push_str(&format!(" --ar {}:{}", req.width, req.height));
    }
    prompt
}

/// Parse MidJourney's `"57%"` progress string; absent or malformed is 0
fn parse_progress(progress: &str) -> u8 {
    progress
        .trim_end_matches('%')
        .parse::<u8>()
        .unwrap_or(0)
        .min(100)
}

fn apply_secret(
    builder: reqwest::RequestBuilder,
    cfg: &MidJourneyConfig,
) -> reqwest::RequestBuilder {
    match cfg.api_secret.as_deref() {
        Some(secret) => builder.header("mj-api-secret", secret),
        None => builder,
    }
}

pub(crate) async fn submit_imagine(
    http: &Client,
    cfg: &MidJourneyConfig,
    req: &ImagineRequest,
) -> Result<String> {
    let request = SubmitRequest {
        prompt: full_prompt(req),
    };

    let response = apply_secret(
        http.post(format!("{}/mj/submit/imagine", cfg.base_url)),
        cfg,
    )
    .json(&request)
    .send()
    .await?;
    let body = response.text().await?;

    let parsed: SubmitResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("mj submit response: {e}")))?;

    if parsed.code != CODE_SUBMITTED && parsed.code != CODE_QUEUED {
        return Err(PolychatError::Provider {
            provider: "mj".to_string(),
            code: Some(parsed.code.to_string()),
            message: parsed.description,
        });
    }

    parsed
        .result
        .ok_or_else(|| PolychatError::Protocol("mj submit response has no task id".into()))
}

pub(crate) async fn fetch_task(
    http: &Client,
    cfg: &MidJourneyConfig,
    task_id: &str,
) -> Result<ImagineTask> {
    let response = apply_secret(
        http.get(format!("{}/mj/task/{task_id}/fetch", cfg.base_url)),
        cfg,
    )
    .send()
    .await?;
    let body = response.text().await?;

    let parsed: FetchResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("mj fetch response: {e}")))?;

    Ok(ImagineTask {
        task_id: parsed.id,
        progress: parse_progress(&parsed.progress),
        image_url: parsed.image_url,
        fail_reason: parsed.fail_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(base: &str) -> MidJourneyConfig {
        MidJourneyConfig {
            base_url: base.to_string(),
            api_secret: Some("mjsecret".to_string()),
        }
    }

    #[test]
    fn test_full_prompt_appends_negative_and_ratio() {
        let req = ImagineRequest {
            prompt: "a cat".to_string(),
            negative_prompt: Some("dogs".to_string()),
            width: 16,
            height: 9,
            ..ImagineRequest::default()
        };
        assert_eq!(full_prompt(&req), "a cat --no dogs --ar 16:9");
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("57%"), 57);
        assert_eq!(parse_progress("100%"), 100);
        assert_eq!(parse_progress(""), 0);
        assert_eq!(parse_progress("done"), 0);
    }

    #[tokio::test]
    async fn test_submit_returns_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mj/submit/imagine"))
            .and(header("mj-api-secret", "mjsecret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 1,
                "description": "submitted",
                "result": "175489"
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let task_id = submit_imagine(
            &http,
            &cfg(&server.uri()),
            &ImagineRequest {
                prompt: "a cat".to_string(),
                ..ImagineRequest::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(task_id, "175489");
    }

    #[tokio::test]
    async fn test_submit_rejection_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mj/submit/imagine"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 24,
                "description": "banned prompt detected"
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let err = submit_imagine(
            &http,
            &cfg(&server.uri()),
            &ImagineRequest {
                prompt: "x".to_string(),
                ..ImagineRequest::default()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PolychatError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_fetch_maps_task_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mj/task/175489/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "175489",
                "progress": "100%",
                "imageUrl": "https://cdn.example/x.png",
                "status": "SUCCESS"
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let task = fetch_task(&http, &cfg(&server.uri()), "175489")
            .await
            .unwrap();
        assert!(task.is_done());
        assert_eq!(task.image_url.as_deref(), Some("https://cdn.example/x.png"));
    }
}

//! Stable Diffusion WebUI (A1111) adapter
//!
//! txt2img is synchronous: the response body carries finished images as
//! base64. Storage of the decoded payloads is the orchestrator's concern.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::StableDiffusionConfig;
use crate::error::{PolychatError, Result};

use super::ImagineRequest;

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    batch_size: u32,
    width: u32,
    height: u32,
    steps: u32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

pub(crate) async fn txt2img(
    http: &Client,
    cfg: &StableDiffusionConfig,
    req: &ImagineRequest,
) -> Result<Vec<Vec<u8>>> {
    let request = Txt2ImgRequest {
        prompt: &req.prompt,
        negative_prompt: req.negative_prompt.as_deref().unwrap_or(""),
        batch_size: req.count.max(1),
        width: req.width,
        height: req.height,
        steps: cfg.steps.max(1),
    };

    let response = http
        .post(format!("{}/sdapi/v1/txt2img", cfg.base_url))
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(PolychatError::Provider {
            provider: "sd".to_string(),
            code: Some(status.as_u16().to_string()),
            message: body,
        });
    }

    let parsed: Txt2ImgResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("sd txt2img response: {e}")))?;

    parsed
        .images
        .iter()
        .map(|b64| {
            BASE64
                .decode(b64)
                .map_err(|e| PolychatError::Protocol(format!("sd image payload: {e}")))
        })
        .collect()
}

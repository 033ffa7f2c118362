//! iFlyTek Spark adapter (WebSocket)
//!
//! Spark authenticates by signing the handshake URL: an HMAC-SHA256 over
//! `host`/`date`/`request-line` with the API secret, base64-encoded into an
//! `authorization` query parameter. One request frame is sent after the
//! handshake; the server then streams response frames until `status == 2`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::{SinkExt, Stream};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::config::SparkConfig;
use crate::error::{PolychatError, Result};
use crate::messages::ChatMessage;

use super::ChatOptions;

type HmacSha256 = Hmac<Sha256>;

/// Build the signed handshake URL for a given timestamp
pub(crate) fn signed_url(cfg: &SparkConfig, now: DateTime<Utc>) -> Result<Url> {
    let mut url = Url::parse(&cfg.endpoint)
        .map_err(|e| PolychatError::Parameter(format!("bad spark endpoint: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| PolychatError::Parameter("spark endpoint has no host".into()))?
        .to_string();
    let path = url.path().to_string();

    let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let signature_origin = format!("host: {host}\ndate: {date}\nGET {path} HTTP/1.1");

    let mut mac = HmacSha256::new_from_slice(cfg.api_secret.as_bytes())
        .map_err(|_| PolychatError::Parameter("empty spark api secret".into()))?;
    mac.update(signature_origin.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let authorization_origin = format!(
        "api_key=\"{}\", algorithm=\"hmac-sha256\", headers=\"host date request-line\", signature=\"{signature}\"",
        cfg.api_key
    );
    let authorization = BASE64.encode(authorization_origin.as_bytes());

    url.query_pairs_mut()
        .append_pair("authorization", &authorization)
        .append_pair("date", &date)
        .append_pair("host", &host);
    Ok(url)
}

/// Build the single request frame sent after the handshake
pub(crate) fn build_request(
    cfg: &SparkConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> serde_json::Value {
    let text: Vec<_> = messages
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect();

    let mut chat = json!({
        "domain": opts.model.as_deref().unwrap_or(&cfg.domain),
    });
    if let Some(t) = opts.temperature {
        chat["temperature"] = json!(t);
    }
    if let Some(m) = opts.max_tokens {
        chat["max_tokens"] = json!(m);
    }

    json!({
        "header": {"app_id": cfg.app_id},
        "parameter": {"chat": chat},
        "payload": {"message": {"text": text}},
    })
}

/// Open the WebSocket, send the request frame and hand back the frame stream
pub(crate) async fn open_stream(
    cfg: &SparkConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<impl Stream<Item = std::result::Result<Message, tungstenite::Error>> + Send> {
    let url = signed_url(cfg, Utc::now())?;

    let (mut ws, _) = connect_async(url.as_str()).await?;
    let frame = build_request(cfg, messages, opts);
    ws.send(Message::Text(frame.to_string().into())).await?;

    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> SparkConfig {
        SparkConfig {
            app_id: "app1".to_string(),
            api_key: "key1".to_string(),
            api_secret: "secret1".to_string(),
            endpoint: "wss://spark-api.xf-yun.com/v3.5/chat".to_string(),
            domain: "generalv3.5".to_string(),
        }
    }

    #[test]
    fn test_signed_url_carries_auth_params() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let url = signed_url(&cfg(), now).unwrap();

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["host"], "spark-api.xf-yun.com");
        assert_eq!(pairs["date"], "Wed, 01 May 2024 12:00:00 GMT");

        let decoded = String::from_utf8(BASE64.decode(&pairs["authorization"]).unwrap()).unwrap();
        assert!(decoded.contains("api_key=\"key1\""));
        assert!(decoded.contains("algorithm=\"hmac-sha256\""));
        assert!(decoded.contains("headers=\"host date request-line\""));
    }

    #[test]
    fn test_signature_depends_on_date() {
        let a = signed_url(&cfg(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()).unwrap();
        let b = signed_url(&cfg(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap()).unwrap();
        assert_ne!(a.query(), b.query());
    }

    #[test]
    fn test_request_frame_shape() {
        let frame = build_request(
            &cfg(),
            &[ChatMessage::user("hello")],
            &ChatOptions {
                temperature: Some(0.5),
                max_tokens: Some(1024),
                ..ChatOptions::default()
            },
        );

        assert_eq!(frame["header"]["app_id"], "app1");
        assert_eq!(frame["parameter"]["chat"]["domain"], "generalv3.5");
        assert_eq!(frame["parameter"]["chat"]["max_tokens"], 1024);
        assert_eq!(frame["payload"]["message"]["text"][0]["role"], "user");
        assert_eq!(frame["payload"]["message"]["text"][0]["content"], "hello");
    }
}

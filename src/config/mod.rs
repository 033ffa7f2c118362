//! Configuration for the orchestration core
//!
//! The application entry point constructs one [`AiConfig`] (typically via
//! [`AiConfig::from_env`]) and hands it to the orchestrator. There is no
//! module-level singleton; configuration is an explicit dependency.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// Credentials and defaults for an OpenAI-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// GLM (Zhipu) open platform credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            model: "glm-4".to_string(),
            embedding_model: "embedding-2".to_string(),
        }
    }
}

/// Baidu ERNIE workshop credentials
///
/// `access_token` is the already-exchanged OAuth token; token refresh is the
/// consuming application's concern (it goes through the config collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaiduConfig {
    pub access_token: String,
    pub base_url: String,
    pub model: String,
}

impl Default for BaiduConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: "https://aip.baidubce.com".to_string(),
            model: "completions_pro".to_string(),
        }
    }
}

/// Google Gemini credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
        }
    }
}

/// iFlyTek Spark credentials (WebSocket API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparkConfig {
    pub app_id: String,
    pub api_key: String,
    pub api_secret: String,
    /// WebSocket endpoint, e.g. `wss://spark-api.xf-yun.com/v3.5/chat`
    pub endpoint: String,
    /// Model domain matching the endpoint version, e.g. `generalv3.5`
    pub domain: String,
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            endpoint: "wss://spark-api.xf-yun.com/v3.5/chat".to_string(),
            domain: "generalv3.5".to_string(),
        }
    }
}

/// MidJourney proxy endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MidJourneyConfig {
    pub base_url: String,
    /// Optional `mj-api-secret` header value
    pub api_secret: Option<String>,
}

/// Stable Diffusion WebUI (A1111) endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StableDiffusionConfig {
    pub base_url: String,
    pub steps: u32,
}

/// Top-level configuration handed to the orchestrator at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub openai: Option<OpenAiConfig>,
    pub glm: Option<GlmConfig>,
    pub baidu: Option<BaiduConfig>,
    pub gemini: Option<GeminiConfig>,
    pub spark: Option<SparkConfig>,
    pub midjourney: Option<MidJourneyConfig>,
    pub stable_diffusion: Option<StableDiffusionConfig>,

    /// Provider used when the caller does not name one
    pub default_provider: ProviderKind,

    /// Token budget for retrieval-augmented context assembly
    pub context_token_budget: u32,

    /// Minimum token size of one resource page chunk
    pub page_min_tokens: u32,

    /// Dialog history turns included in a plain chat prompt
    pub history_backtrack: usize,

    /// TTL of an in-flight chat stream session in the cache
    #[serde(with = "duration_secs")]
    pub session_ttl: Duration,

    /// Interval between image-task polls
    #[serde(with = "duration_secs")]
    pub imagine_poll_interval: Duration,

    /// Maximum image-task polls before giving up
    pub imagine_max_polls: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openai: None,
            glm: None,
            baidu: None,
            gemini: None,
            spark: None,
            midjourney: None,
            stable_diffusion: None,
            default_provider: ProviderKind::Glm,
            context_token_budget: 3000,
            page_min_tokens: 150,
            history_backtrack: 5,
            session_ttl: Duration::from_secs(180),
            imagine_poll_interval: Duration::from_secs(1),
            imagine_max_polls: 120,
        }
    }
}

impl AiConfig {
    /// Build a configuration from environment variables
    ///
    /// A provider section is populated only when its key credential is set,
    /// so an unconfigured provider surfaces as `NotConfigured` at call time
    /// rather than failing startup.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            let mut openai = OpenAiConfig {
                api_key: key,
                ..OpenAiConfig::default()
            };
            if let Ok(base) = std::env::var("OPENAI_BASE_URL") {
                openai.base_url = base;
            }
            if let Ok(model) = std::env::var("OPENAI_MODEL") {
                openai.model = model;
            }
            cfg.openai = Some(openai);
        }

        if let Ok(key) = std::env::var("GLM_API_KEY") {
            let mut glm = GlmConfig {
                api_key: key,
                ..GlmConfig::default()
            };
            if let Ok(model) = std::env::var("GLM_MODEL") {
                glm.model = model;
            }
            cfg.glm = Some(glm);
        }

        if let Ok(token) = std::env::var("BAIDU_ACCESS_TOKEN") {
            let mut baidu = BaiduConfig {
                access_token: token,
                ..BaiduConfig::default()
            };
            if let Ok(model) = std::env::var("BAIDU_MODEL") {
                baidu.model = model;
            }
            cfg.baidu = Some(baidu);
        }

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            cfg.gemini = Some(GeminiConfig {
                api_key: key,
                ..GeminiConfig::default()
            });
        }

        if let (Ok(app_id), Ok(api_key), Ok(api_secret)) = (
            std::env::var("SPARK_APP_ID"),
            std::env::var("SPARK_API_KEY"),
            std::env::var("SPARK_API_SECRET"),
        ) {
            cfg.spark = Some(SparkConfig {
                app_id,
                api_key,
                api_secret,
                ..SparkConfig::default()
            });
        }

        if let Ok(base) = std::env::var("MJ_BASE_URL") {
            cfg.midjourney = Some(MidJourneyConfig {
                base_url: base,
                api_secret: std::env::var("MJ_API_SECRET").ok(),
            });
        }

        if let Ok(base) = std::env::var("SD_BASE_URL") {
            cfg.stable_diffusion = Some(StableDiffusionConfig {
                base_url: base,
                steps: 20,
            });
        }

        if let Ok(name) = std::env::var("DEFAULT_PROVIDER") {
            if let Ok(kind) = name.parse() {
                cfg.default_provider = kind;
            }
        }

        cfg
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AiConfig::default();
        assert_eq!(cfg.default_provider, ProviderKind::Glm);
        assert_eq!(cfg.context_token_budget, 3000);
        assert_eq!(cfg.session_ttl, Duration::from_secs(180));
        assert!(cfg.openai.is_none());
    }

    #[test]
    fn test_duration_roundtrip() {
        let cfg = AiConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AiConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_ttl, cfg.session_ttl);
        assert_eq!(back.imagine_poll_interval, cfg.imagine_poll_interval);
    }
}

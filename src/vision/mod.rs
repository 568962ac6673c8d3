//! Image diagnosis adapter: crop/pest photo classification
//!
//! Validation happens before any network call: unsupported formats and
//! oversize payloads are rejected outright rather than resized or
//! transcoded silently. A failing vision call is non-fatal for the chat
//! pipeline; the coordinator proceeds without diagnosis context.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::errors::KrishiRagError;
use crate::errors::Result;
use crate::llm::ChatMessage;
use crate::models::DiagnosisFinding;
use crate::models::DiagnosisResult;

/// Image formats accepted for diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Sniff the format from magic bytes; `None` for anything unsupported.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }
}

/// A raw label/confidence pair from the vision model
#[derive(Debug, Clone, Deserialize)]
pub struct RawClassification {
    pub label: String,
    pub confidence: f32,
    #[serde(default)]
    pub suggested_action: Option<String>,
}

/// Backend capable of classifying an image into labeled findings
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn classify(&self, image: &[u8], format: ImageFormat) -> Result<Vec<RawClassification>>;
}

/// Validates images, dispatches classification and normalizes findings
pub struct DiagnosisService {
    backend: std::sync::Arc<dyn VisionBackend>,
    min_confidence: f32,
    max_image_bytes: usize,
}

impl DiagnosisService {
    pub fn new(
        backend: std::sync::Arc<dyn VisionBackend>,
        min_confidence: f32,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            backend,
            min_confidence,
            max_image_bytes,
        }
    }

    /// Validate size and format without touching the network.
    ///
    /// # Errors
    /// - `InvalidImage` for empty, oversize or unsupported payloads
    pub fn validate(&self, image: &[u8]) -> Result<ImageFormat> {
        if image.is_empty() {
            return Err(KrishiRagError::InvalidImage("empty payload".to_string()));
        }
        if image.len() > self.max_image_bytes {
            return Err(KrishiRagError::InvalidImage(format!(
                "payload of {} bytes exceeds the {} byte limit",
                image.len(),
                self.max_image_bytes
            )));
        }
        ImageFormat::sniff(image).ok_or_else(|| {
            KrishiRagError::InvalidImage("unsupported format, expected JPEG/PNG/WebP".to_string())
        })
    }

    /// Run classification and map results into sorted, thresholded findings.
    ///
    /// # Errors
    /// - `InvalidImage` for rejected payloads (surfaced to the caller)
    /// - `DiagnosisUnavailable` when the vision call fails (non-fatal)
    pub async fn diagnose(&self, image: &[u8]) -> Result<DiagnosisResult> {
        let format = self.validate(image)?;

        let raw = self.backend.classify(image, format).await?;
        let mut findings: Vec<DiagnosisFinding> = raw
            .into_iter()
            .filter(|c| c.confidence >= self.min_confidence)
            .map(|c| DiagnosisFinding {
                label: c.label,
                confidence: c.confidence.clamp(0.0, 1.0),
                suggested_action: c.suggested_action,
            })
            .collect();
        findings.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let summary = findings.first().map(|top| {
            format!(
                "Most likely: {} (confidence {:.0}%)",
                top.label,
                top.confidence * 100.0
            )
        });

        debug!("Diagnosis produced {} finding(s)", findings.len());
        Ok(DiagnosisResult { findings, summary })
    }
}

/// HTTP vision client posting the image to an OpenAI-style vision chat
/// endpoint and asking for structured JSON output.
pub struct HttpVisionClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

const CLASSIFY_INSTRUCTION: &str = "You are an expert agricultural advisor for farmers in Kerala, India. \
    Identify the crop and any visible pest, disease or nutrient issue in the image. \
    Reply with ONLY a JSON array, each element an object with fields \
    \"label\" (string), \"confidence\" (number between 0 and 1) and \
    \"suggested_action\" (string or null).";

impl HttpVisionClient {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KrishiRagError::Http(e.to_string()))?;

        Ok(Self {
            endpoint,
            api_key,
            model,
            client,
        })
    }

    /// Build from the vision section of the application config
    pub fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        Self::new(
            config.vision.endpoint.clone(),
            config.vision.api_key.clone(),
            config.vision.model.clone(),
            Duration::from_secs(config.vision.timeout_secs),
        )
    }
}

#[async_trait]
impl VisionBackend for HttpVisionClient {
    async fn classify(&self, image: &[u8], format: ImageFormat) -> Result<Vec<RawClassification>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let data_url = format!("data:{};base64,{}", format.mime_type(), encoded);

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let request = VisionRequest {
            model: &self.model,
            messages: vec![
                VisionMessage::Text(ChatMessage::system(CLASSIFY_INSTRUCTION)),
                VisionMessage::Multi {
                    role: "user",
                    content: vec![
                        VisionPart::Text {
                            text: "Analyze this crop/pest photo.",
                        },
                        VisionPart::ImageUrl {
                            image_url: ImageUrl {
                                url: &data_url,
                                detail: "high",
                            },
                        },
                    ],
                },
            ],
            max_tokens: 800,
            temperature: 0.3,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| KrishiRagError::DiagnosisUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(KrishiRagError::DiagnosisUnavailable(format!(
                "vision endpoint returned {status}"
            )));
        }

        let parsed: VisionResponse = response
            .json()
            .await
            .map_err(|e| KrishiRagError::DiagnosisUnavailable(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                KrishiRagError::DiagnosisUnavailable("vision endpoint returned no choices".into())
            })?;

        // The model is instructed to reply with bare JSON; tolerate fenced blocks
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        serde_json::from_str(trimmed)
            .map_err(|e| KrishiRagError::DiagnosisUnavailable(format!("unparseable reply: {e}")))
    }
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    messages: Vec<VisionMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
#[serde(untagged)]
enum VisionMessage<'a> {
    Text(ChatMessage),
    Multi {
        role: &'a str,
        content: Vec<VisionPart<'a>>,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum VisionPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
    detail: &'a str,
}

#[derive(Deserialize)]
struct VisionResponse {
    choices: Vec<VisionChoice>,
}

#[derive(Deserialize)]
struct VisionChoice {
    message: VisionChoiceMessage,
}

#[derive(Deserialize)]
struct VisionChoiceMessage {
    content: String,
}

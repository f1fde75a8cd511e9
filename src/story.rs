//! Caption generation: strategy dispatch, model invocation, and reply
//! normalization.
//!
//! The external contract of [`CaptionService::analyze`] is total: any
//! validated batch resolves to a caption. Model failures and unparseable
//! replies become fixed placeholder pairs instead of errors.

use std::sync::OnceLock;

use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::media::{self, MediaBatch, UploadedFile};
use crate::prompts;
use crate::video::{VideoDetails, VideoWorkspace, MAX_FRAMES};
use crate::vision::{image_part, text_part, ModelReply, TokenUsage, VisionClient};

/// The canonical bilingual caption shape. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionResult {
    pub english: String,
    pub thai: Option<String>,
}

/// A finished analysis: caption plus token accounting.
#[derive(Debug)]
pub struct Analysis {
    pub caption: CaptionResult,
    pub usage: TokenUsage,
}

/// Body of a successful `POST /analyze/` response.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub english: String,
    pub thai: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<Analysis> for AnalyzeResponse {
    fn from(analysis: Analysis) -> Self {
        Self {
            english: analysis.caption.english,
            thai: analysis.caption.thai.unwrap_or_default(),
            input_tokens: analysis.usage.input_tokens,
            output_tokens: analysis.usage.output_tokens,
        }
    }
}

/// Decided once at startup and injected; there is no mutable global fallback
/// toggle, so both modes are testable deterministically.
pub enum ServiceMode {
    Live(VisionClient),
    Offline,
}

/// Generation strategy, picked exclusively by batch cardinality and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SingleImage,
    MultiImage,
    Video,
}

pub fn strategy_for(batch: &MediaBatch) -> Strategy {
    match batch {
        MediaBatch::Images(files) if files.len() == 1 => Strategy::SingleImage,
        MediaBatch::Images(_) => Strategy::MultiImage,
        MediaBatch::Video(_) => Strategy::Video,
    }
}

pub struct CaptionService {
    mode: ServiceMode,
}

impl CaptionService {
    pub fn new(mode: ServiceMode) -> Self {
        Self { mode }
    }

    /// Analyzes a validated batch. Only upload-shaped problems (undecodable
    /// image bytes, temp-file I/O) can fail; the model path always resolves.
    pub async fn analyze(&self, batch: MediaBatch, prompt: &str) -> Result<Analysis, ApiError> {
        let prompt = prompt.trim();
        info!("strategy selected: {:?}", strategy_for(&batch));

        let client = match &self.mode {
            ServiceMode::Offline => {
                warn!("offline mode: returning canned caption without a model call");
                return Ok(Analysis {
                    caption: offline_placeholder(&batch),
                    usage: TokenUsage::default(),
                });
            }
            ServiceMode::Live(client) => client,
        };

        match batch {
            MediaBatch::Images(files) => {
                let encoded = encode_images(&files)?;
                if let [single] = encoded.as_slice() {
                    Ok(self.caption_single_image(client, single, prompt).await)
                } else {
                    Ok(self.caption_image_set(client, &encoded, prompt).await)
                }
            }
            MediaBatch::Video(file) => self.caption_video(client, &file, prompt).await,
        }
    }

    async fn caption_single_image(
        &self,
        client: &VisionClient,
        base64_image: &str,
        prompt: &str,
    ) -> Analysis {
        let instruction = if prompt.is_empty() {
            prompts::SINGLE_IMAGE_INSTRUCTION
        } else {
            prompt
        };
        let content = vec![text_part(instruction), image_part(base64_image)];
        self.complete(client, content).await
    }

    /// All images travel in one request; the model produces one unified
    /// caption spanning the whole set.
    async fn caption_image_set(
        &self,
        client: &VisionClient,
        base64_images: &[String],
        prompt: &str,
    ) -> Analysis {
        let instruction = if prompt.is_empty() {
            prompts::MULTI_IMAGE_INSTRUCTION
        } else {
            prompt
        };
        let mut content = vec![text_part(instruction)];
        content.extend(base64_images.iter().map(|b64| image_part(b64)));
        self.complete(client, content).await
    }

    async fn caption_video(
        &self,
        client: &VisionClient,
        file: &UploadedFile,
        prompt: &str,
    ) -> Result<Analysis, ApiError> {
        let workspace = VideoWorkspace::create(&file.data).await?;
        let details = workspace.probe(file).await;
        info!(
            "video '{}' ({} bytes, {}): duration {:?}",
            details.filename, details.size, details.content_type, details.duration
        );

        let frames = workspace
            .extract_frames(&details, MAX_FRAMES)
            .await
            .unwrap_or_else(|e| {
                warn!("frame extraction failed: {e:#}");
                Vec::new()
            });

        let analysis = if frames.is_empty() {
            warn!("no frames available, using metadata-only caption");
            self.caption_video_metadata(client, &details, prompt).await
        } else {
            self.caption_video_frames(client, &frames, &details, prompt)
                .await
        };

        workspace.cleanup().await;
        Ok(analysis)
    }

    async fn caption_video_frames(
        &self,
        client: &VisionClient,
        frames: &[String],
        details: &VideoDetails,
        prompt: &str,
    ) -> Analysis {
        let instruction = if prompt.is_empty() {
            prompts::VIDEO_FRAMES_INSTRUCTION
        } else {
            prompt
        };
        let mut content = vec![text_part(instruction)];
        content.extend(frames.iter().map(|b64| image_part(b64)));

        match client.generate(prompts::STORY_SYSTEM_PROMPT, content).await {
            Ok(reply) => finish(reply),
            Err(e) => {
                // Frames could not be analyzed; the metadata prompt still can.
                error!("frame analysis failed, falling back to metadata: {e:#}");
                self.caption_video_metadata(client, details, prompt).await
            }
        }
    }

    async fn caption_video_metadata(
        &self,
        client: &VisionClient,
        details: &VideoDetails,
        prompt: &str,
    ) -> Analysis {
        let text = format!(
            "Create an engaging caption for a video with these details: {}",
            details.describe(prompt)
        );
        self.complete(client, vec![text_part(&text)]).await
    }

    /// One model invocation, fully absorbed: transport and API failures yield
    /// the invocation placeholder, unparseable replies the parse placeholder.
    async fn complete(&self, client: &VisionClient, content: Vec<serde_json::Value>) -> Analysis {
        match client.generate(prompts::STORY_SYSTEM_PROMPT, content).await {
            Ok(reply) => finish(reply),
            Err(e) => {
                error!("vision model invocation failed: {e:#}");
                Analysis {
                    caption: invocation_failure_placeholder(),
                    usage: TokenUsage::default(),
                }
            }
        }
    }
}

fn finish(reply: ModelReply) -> Analysis {
    Analysis {
        caption: parse_model_reply(&reply.text),
        usage: reply.usage,
    }
}

fn encode_images(files: &[UploadedFile]) -> Result<Vec<String>, ApiError> {
    files
        .iter()
        .map(|f| {
            media::encode_image_as_jpeg_base64(&f.data).map_err(|e| {
                ApiError::BadRequest(format!(
                    "File '{}' could not be read as an image: {}",
                    f.filename, e
                ))
            })
        })
        .collect()
}

// --- Reply normalization ---------------------------------------------------

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap())
}

/// Pulls the JSON object out of a model reply that may be wrapped in a fenced
/// code block, or decorated with stray fence markers and a `json` tag.
pub fn extract_json_payload(content: &str) -> String {
    if let Some(caps) = fence_regex().captures(content) {
        return caps[1].to_string();
    }

    let mut cleaned = content.trim().trim_matches('`').trim();
    if let Some(prefix) = cleaned.get(..4) {
        if prefix.eq_ignore_ascii_case("json") {
            cleaned = cleaned[4..].trim_start();
        }
    }
    cleaned.to_string()
}

/// Normalizes a raw model reply into a [`CaptionResult`]. Never fails: any
/// extraction, parse, or shape problem yields the parse-failure placeholder.
pub fn parse_model_reply(content: &str) -> CaptionResult {
    match try_parse(content) {
        Ok(caption) => caption,
        Err(e) => {
            let preview: String = content.chars().take(500).collect();
            warn!("could not parse model reply ({e}); raw content: {preview}");
            parse_failure_placeholder()
        }
    }
}

fn try_parse(content: &str) -> anyhow::Result<CaptionResult> {
    let payload = extract_json_payload(content);
    let value: serde_json::Value =
        serde_json::from_str(&payload).context("reply is not valid JSON")?;

    let english = value
        .get("english")
        .and_then(|v| v.as_str())
        .context("missing required 'english' string field")?
        .to_string();
    let thai = value
        .get("thai")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(CaptionResult { english, thai })
}

// --- Fixed fallback pairs --------------------------------------------------

fn parse_failure_placeholder() -> CaptionResult {
    CaptionResult {
        english: "The caption could not be generated in the expected format. Please try again."
            .to_string(),
        thai: Some("ไม่สามารถสร้างคำบรรยายในรูปแบบที่คาดไว้ได้ กรุณาลองใหม่อีกครั้ง".to_string()),
    }
}

fn invocation_failure_placeholder() -> CaptionResult {
    CaptionResult {
        english: "The captioning service could not be reached. Please try again shortly."
            .to_string(),
        thai: Some(
            "ไม่สามารถเชื่อมต่อกับบริการสร้างคำบรรยายได้ กรุณาลองใหม่อีกครั้งในภายหลัง".to_string(),
        ),
    }
}

fn offline_placeholder(batch: &MediaBatch) -> CaptionResult {
    match batch {
        MediaBatch::Images(_) => CaptionResult {
            english: "Analysis service is currently unavailable due to configuration issues."
                .to_string(),
            thai: Some(
                "บริการวิเคราะห์ไม่พร้อมใช้งานในขณะนี้เนื่องจากปัญหาการกำหนดค่า".to_string(),
            ),
        },
        MediaBatch::Video(_) => CaptionResult {
            english: "Video analysis is currently unavailable due to configuration issues."
                .to_string(),
            thai: Some(
                "บริการวิเคราะห์วิดีโอไม่พร้อมใช้งานในขณะนี้เนื่องจากปัญหาการกำหนดค่า".to_string(),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content_type: &str) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            content_type: content_type.to_string(),
            data: vec![0u8; 16],
        }
    }

    #[test]
    fn parsing_is_idempotent_on_clean_json() {
        let caption = parse_model_reply(r#"{"english":"x","thai":"y"}"#);
        assert_eq!(
            caption,
            CaptionResult {
                english: "x".to_string(),
                thai: Some("y".to_string()),
            }
        );
    }

    #[test]
    fn parsing_recovers_fenced_json_with_language_tag() {
        let caption = parse_model_reply("```json\n{\"english\":\"x\"}\n```");
        assert_eq!(caption.english, "x");
        assert_eq!(caption.thai, None);
    }

    #[test]
    fn parsing_recovers_fenced_json_without_language_tag() {
        let caption = parse_model_reply("```\n{\"english\":\"a\",\"thai\":\"ข\"}\n```");
        assert_eq!(caption.english, "a");
        assert_eq!(caption.thai.as_deref(), Some("ข"));
    }

    #[test]
    fn parsing_finds_fenced_json_inside_prose() {
        let reply = "Sure, here it is:\n```json\n{\"english\":\"x\",\"thai\":\"y\"}\n```\nEnjoy!";
        let caption = parse_model_reply(reply);
        assert_eq!(caption.english, "x");
    }

    #[test]
    fn parsing_strips_unterminated_fence_residue() {
        let caption = parse_model_reply("```json\n{\"english\":\"x\"}");
        assert_eq!(caption.english, "x");
    }

    #[test]
    fn malformed_json_yields_parse_placeholder() {
        let caption = parse_model_reply("{\"english\": \"x\"");
        assert!(caption.english.contains("expected format"));
        assert!(caption.thai.is_some());
    }

    #[test]
    fn missing_english_yields_parse_placeholder() {
        let caption = parse_model_reply(r#"{"thai":"y"}"#);
        assert!(caption.english.contains("expected format"));
    }

    #[test]
    fn non_string_english_yields_parse_placeholder() {
        let caption = parse_model_reply(r#"{"english": 42}"#);
        assert!(caption.english.contains("expected format"));
    }

    #[test]
    fn null_thai_is_treated_as_absent() {
        let caption = parse_model_reply(r#"{"english":"x","thai":null}"#);
        assert_eq!(caption.thai, None);
    }

    #[test]
    fn strategy_selection_by_cardinality_and_type() {
        let single = MediaBatch::Images(vec![file("a.jpg", "image/jpeg")]);
        assert_eq!(strategy_for(&single), Strategy::SingleImage);

        let multi = MediaBatch::Images(vec![
            file("a.png", "image/png"),
            file("b.png", "image/png"),
            file("c.png", "image/png"),
        ]);
        assert_eq!(strategy_for(&multi), Strategy::MultiImage);

        let video = MediaBatch::Video(file("clip.mp4", "video/mp4"));
        assert_eq!(strategy_for(&video), Strategy::Video);
    }

    #[tokio::test]
    async fn offline_mode_returns_canned_image_caption() {
        let service = CaptionService::new(ServiceMode::Offline);
        let batch = MediaBatch::Images(vec![
            file("a.png", "image/png"),
            file("b.png", "image/png"),
            file("c.png", "image/png"),
        ]);

        let analysis = service.analyze(batch, "").await.unwrap();
        assert!(!analysis.caption.english.is_empty());
        assert!(analysis.caption.english.contains("unavailable"));
        assert_eq!(analysis.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn offline_mode_returns_canned_video_caption_without_touching_ffmpeg() {
        let service = CaptionService::new(ServiceMode::Offline);
        let batch = MediaBatch::Video(file("clip.mp4", "video/mp4"));

        let analysis = service.analyze(batch, "any prompt").await.unwrap();
        assert!(analysis.caption.english.contains("Video analysis"));
        assert_eq!(analysis.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn undecodable_image_bytes_are_a_bad_request() {
        let key = "not-a-real-key".to_string();
        let client = VisionClient::new(key, "http://localhost:9".to_string(), "test".to_string());
        let service = CaptionService::new(ServiceMode::Live(client));
        let batch = MediaBatch::Images(vec![file("junk.png", "image/png")]);

        let err = service.analyze(batch, "").await.unwrap_err();
        assert!(err.to_string().contains("junk.png"));
    }

    #[test]
    fn response_serialization_defaults_missing_thai_to_empty() {
        let analysis = Analysis {
            caption: CaptionResult {
                english: "x".to_string(),
                thai: None,
            },
            usage: TokenUsage {
                input_tokens: 12,
                output_tokens: 34,
            },
        };
        let response = AnalyzeResponse::from(analysis);
        assert_eq!(response.thai, "");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 34);
    }
}

//! Video probing and frame extraction via ffprobe/ffmpeg subprocesses.
//!
//! Every step here is best-effort: missing tools or broken files degrade to
//! whatever metadata is known, and the caption service falls back to a
//! metadata-only prompt when no frames come out.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use tokio::process::Command;
use tracing::{info, warn};

use crate::media::UploadedFile;

/// Upper bound on frames sent to the model for one video.
pub const MAX_FRAMES: usize = 10;

/// Probed metadata for an uploaded video. Fields stay `None` when ffprobe is
/// unavailable or the file resists probing.
#[derive(Debug, Clone, Default)]
pub struct VideoDetails {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub duration: Option<String>,
    pub duration_seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_audio: bool,
    pub audio_codec: Option<String>,
}

impl VideoDetails {
    /// Renders the metadata as a prose description for the metadata-only
    /// caption fallback.
    pub fn describe(&self, user_prompt: &str) -> String {
        let duration = self.duration.as_deref().unwrap_or("Unknown");
        let width = self
            .width
            .map_or_else(|| "Unknown".to_string(), |w| w.to_string());
        let height = self
            .height
            .map_or_else(|| "Unknown".to_string(), |h| h.to_string());

        let mut description = format!(
            "A video file named '{}' with duration {}. Resolution: {}x{}. ",
            self.filename, duration, width, height
        );

        if self.has_audio {
            let codec = self.audio_codec.as_deref().unwrap_or("unknown");
            description.push_str(&format!("The video has audio using {} codec. ", codec));
        } else {
            description.push_str("The video does not have audio. ");
        }

        if let Some(ext) = self.filename.rsplit_once('.').map(|(_, ext)| ext) {
            description.push_str(&format!("The video format is .{}. ", ext.to_lowercase()));
        }

        if !user_prompt.is_empty() {
            description.push_str(&format!("User prompt: {}", user_prompt));
        }

        description
    }
}

/// Formats a duration in seconds as `M:SS`.
pub fn format_duration(seconds: f64) -> String {
    let whole = seconds as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

/// Per-request scratch directory holding the uploaded video and any frames
/// extracted from it. Removed before the response is sent.
pub struct VideoWorkspace {
    temp_dir: PathBuf,
    input_path: PathBuf,
}

impl VideoWorkspace {
    pub async fn create(data: &[u8]) -> Result<Self> {
        let temp_dir =
            std::env::temp_dir().join(format!("caption_video_{}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .context("could not create temp dir for video")?;
        let input_path = temp_dir.join("input.mp4");
        tokio::fs::write(&input_path, data)
            .await
            .context("could not write uploaded video to temp file")?;
        Ok(Self {
            temp_dir,
            input_path,
        })
    }

    /// Probes the video with ffprobe. Returns whatever could be learned;
    /// probing failures only cost detail, never the request.
    pub async fn probe(&self, upload: &UploadedFile) -> VideoDetails {
        let mut details = VideoDetails {
            filename: upload.filename.clone(),
            content_type: upload.content_type.clone(),
            size: upload.size(),
            ..VideoDetails::default()
        };

        match self.run_ffprobe().await {
            Ok(probe) => self.fill_from_probe(&mut details, &probe),
            Err(e) => warn!("ffprobe failed for '{}': {e:#}", upload.filename),
        }

        details
    }

    async fn run_ffprobe(&self) -> Result<serde_json::Value> {
        let output = Command::new("ffprobe")
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(&self.input_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .context("could not spawn ffprobe")?;

        if !output.status.success() {
            bail!("ffprobe exited with {}", output.status);
        }
        serde_json::from_slice(&output.stdout).context("ffprobe produced invalid JSON")
    }

    fn fill_from_probe(&self, details: &mut VideoDetails, probe: &serde_json::Value) {
        let streams = probe["streams"].as_array().cloned().unwrap_or_default();

        if let Some(video) = streams
            .iter()
            .find(|s| s["codec_type"].as_str() == Some("video"))
        {
            details.width = video["width"].as_u64().map(|w| w as u32);
            details.height = video["height"].as_u64().map(|h| h as u32);
        }

        if let Some(audio) = streams
            .iter()
            .find(|s| s["codec_type"].as_str() == Some("audio"))
        {
            details.has_audio = true;
            details.audio_codec = audio["codec_name"].as_str().map(str::to_string);
        }

        let duration = probe["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok());
        if let Some(seconds) = duration {
            details.duration_seconds = Some(seconds);
            details.duration = Some(format_duration(seconds));
        }
    }

    /// Extracts up to `max_frames` evenly spaced frames as base64 JPEGs.
    /// Individual frame failures are skipped; an empty result sends the
    /// caller down the metadata-only path.
    pub async fn extract_frames(
        &self,
        details: &VideoDetails,
        max_frames: usize,
    ) -> Result<Vec<String>> {
        let Some(duration) = details.duration_seconds.filter(|d| *d > 0.0) else {
            bail!("unknown video duration, cannot place frame timestamps");
        };

        let mut frames = Vec::new();
        for i in 0..max_frames {
            let timestamp = i as f64 * duration / max_frames as f64;
            let out_path = self.temp_dir.join(format!("frame_{:03}.jpg", i));

            let output = Command::new("ffmpeg")
                .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
                .args(["-ss", &format!("{:.3}", timestamp)])
                .arg("-i")
                .arg(&self.input_path)
                .args(["-frames:v", "1"])
                .args(["-q:v", "4"])
                .arg("-y")
                .arg(&out_path)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await
                .context("could not spawn ffmpeg")?;

            if !output.status.success() {
                warn!(
                    "ffmpeg failed at {:.1}s: {}",
                    timestamp,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                continue;
            }

            match tokio::fs::read(&out_path).await {
                Ok(data) if !data.is_empty() => {
                    frames.push(general_purpose::STANDARD.encode(&data));
                }
                Ok(_) => {}
                Err(e) => warn!("could not read extracted frame {}: {}", i, e),
            }
        }

        info!("extracted {} frame(s) from '{}'", frames.len(), details.filename);
        Ok(frames)
    }

    pub async fn cleanup(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.temp_dir).await {
            warn!("failed to clean up temp dir {:?}: {}", self.temp_dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(45.7), "0:45");
        assert_eq!(format_duration(61.0), "1:01");
        assert_eq!(format_duration(600.0), "10:00");
    }

    #[test]
    fn describe_mentions_duration_and_format() {
        let details = VideoDetails {
            filename: "beach_trip.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            size: 1024,
            duration: Some("1:30".to_string()),
            duration_seconds: Some(90.0),
            width: Some(1920),
            height: Some(1080),
            has_audio: true,
            audio_codec: Some("aac".to_string()),
        };
        let text = details.describe("");
        assert!(text.contains("beach_trip.mp4"));
        assert!(text.contains("1:30"));
        assert!(text.contains("1920x1080"));
        assert!(text.contains("aac"));
        assert!(text.contains(".mp4"));
    }

    #[test]
    fn describe_handles_missing_metadata_and_prompt() {
        let details = VideoDetails {
            filename: "clip.mp4".to_string(),
            ..VideoDetails::default()
        };
        let text = details.describe("make it dramatic");
        assert!(text.contains("Unknown"));
        assert!(text.contains("does not have audio"));
        assert!(text.contains("User prompt: make it dramatic"));
    }
}

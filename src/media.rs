//! Upload classification and validation.
//!
//! A request carries either one or more images or exactly one video, never a
//! mix. The whole batch is accepted or rejected together, and every rejection
//! names the offending file(s).

use std::io::Cursor;

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};

use crate::error::ApiError;

pub const ALLOWED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];
pub const ALLOWED_VIDEO_TYPES: [&str; 1] = ["video/mp4"];

const MB: usize = 1024 * 1024;
pub const MAX_IMAGE_SIZE_MB: usize = 10;
pub const MAX_VIDEO_SIZE_MB: usize = 50;

/// Multipart body ceiling: one video at the 50 MiB limit plus form overhead.
pub const MAX_UPLOAD_BYTES: usize = 60 * MB;

/// One file as received from the multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn is_video(&self) -> bool {
        ALLOWED_VIDEO_TYPES.contains(&self.content_type.as_str())
    }

    fn is_allowed_image(&self) -> bool {
        ALLOWED_IMAGE_TYPES.contains(&self.content_type.as_str())
    }
}

/// A validated upload, classified by type-class.
#[derive(Debug)]
pub enum MediaBatch {
    Images(Vec<UploadedFile>),
    Video(UploadedFile),
}

/// Validates a batch and classifies it as images or a single video.
///
/// Rules, in priority order: non-empty; a video never travels with another
/// file; a lone video stays under 50 MiB; images stay within the allowed
/// types and under 10 MiB each.
pub fn classify(files: Vec<UploadedFile>) -> Result<MediaBatch, ApiError> {
    if files.is_empty() {
        return Err(ApiError::BadRequest("No media files provided.".into()));
    }

    if files.iter().any(UploadedFile::is_video) && files.len() > 1 {
        return Err(ApiError::BadRequest(
            "Invalid file combination. Please upload one or more images (JPG, PNG) \
             or a single video (MP4)."
                .into(),
        ));
    }

    if files.len() == 1 && files[0].is_video() {
        let video = files.into_iter().next().unwrap();
        if video.size() > MAX_VIDEO_SIZE_MB * MB {
            return Err(ApiError::PayloadTooLarge(format!(
                "Video file '{}' too large. Maximum size allowed is {}MB.",
                video.filename, MAX_VIDEO_SIZE_MB
            )));
        }
        return Ok(MediaBatch::Video(video));
    }

    if files.iter().all(UploadedFile::is_allowed_image) {
        for img in &files {
            if img.size() > MAX_IMAGE_SIZE_MB * MB {
                return Err(ApiError::PayloadTooLarge(format!(
                    "Image file '{}' too large. Maximum size allowed is {}MB.",
                    img.filename, MAX_IMAGE_SIZE_MB
                )));
            }
        }
        return Ok(MediaBatch::Images(files));
    }

    let invalid: Vec<&str> = files
        .iter()
        .filter(|f| !f.is_allowed_image() && !f.is_video())
        .map(|f| f.filename.as_str())
        .collect();
    if !invalid.is_empty() {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Unsupported file type(s): {}. Only JPG, PNG images and MP4 videos are supported.",
            invalid.join(", ")
        )));
    }
    Err(ApiError::BadRequest(
        "Invalid file combination. Please upload one or more images (JPG, PNG) \
         or a single video (MP4)."
            .into(),
    ))
}

/// Decodes an uploaded image and re-encodes it as JPEG before base64 inlining.
///
/// Re-encoding normalizes PNG uploads to the single format the model request
/// declares, and rejects files whose bytes are not actually an image.
pub fn encode_image_as_jpeg_base64(data: &[u8]) -> anyhow::Result<String> {
    let img = image::load_from_memory(data).context("could not decode image data")?;

    let mut jpeg_bytes = Vec::new();
    img.write_to(
        &mut Cursor::new(&mut jpeg_bytes),
        image::ImageOutputFormat::Jpeg(85),
    )
    .context("could not re-encode image as JPEG")?;

    Ok(general_purpose::STANDARD.encode(&jpeg_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content_type: &str, size: usize) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            content_type: content_type.to_string(),
            data: vec![0u8; size],
        }
    }

    fn detail(err: ApiError) -> String {
        err.to_string()
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = classify(Vec::new()).unwrap_err();
        assert_eq!(detail(err), "No media files provided.");
    }

    #[test]
    fn video_mixed_with_image_is_rejected() {
        let files = vec![
            file("clip.mp4", "video/mp4", 1024),
            file("photo.jpg", "image/jpeg", 1024),
        ];
        let err = classify(files).unwrap_err();
        assert!(detail(err).contains("Invalid file combination"));
    }

    #[test]
    fn two_videos_are_rejected() {
        let files = vec![
            file("a.mp4", "video/mp4", 1024),
            file("b.mp4", "video/mp4", 1024),
        ];
        let err = classify(files).unwrap_err();
        assert!(detail(err).contains("Invalid file combination"));
    }

    #[test]
    fn valid_images_are_accepted() {
        let files = vec![
            file("a.jpg", "image/jpeg", MB),
            file("b.png", "image/png", MAX_IMAGE_SIZE_MB * MB),
            file("c.jpeg", "image/jpg", 10),
        ];
        match classify(files).unwrap() {
            MediaBatch::Images(imgs) => assert_eq!(imgs.len(), 3),
            MediaBatch::Video(_) => panic!("expected image batch"),
        }
    }

    #[test]
    fn single_video_is_accepted() {
        let files = vec![file("clip.mp4", "video/mp4", MB)];
        match classify(files).unwrap() {
            MediaBatch::Video(v) => assert_eq!(v.filename, "clip.mp4"),
            MediaBatch::Images(_) => panic!("expected video batch"),
        }
    }

    #[test]
    fn oversized_video_rejection_names_the_file() {
        let files = vec![file("huge.mp4", "video/mp4", MAX_VIDEO_SIZE_MB * MB + 1)];
        let err = classify(files).unwrap_err();
        let msg = detail(err);
        assert!(msg.contains("huge.mp4"));
        assert!(msg.contains("50MB"));
    }

    #[test]
    fn oversized_image_rejection_names_the_file() {
        let files = vec![
            file("ok.png", "image/png", MB),
            file("big.jpg", "image/jpeg", MAX_IMAGE_SIZE_MB * MB + 1),
        ];
        let err = classify(files).unwrap_err();
        assert!(detail(err).contains("big.jpg"));
    }

    #[test]
    fn unsupported_type_rejection_names_offenders() {
        let files = vec![
            file("ok.png", "image/png", 10),
            file("anim.gif", "image/gif", 10),
            file("doc.pdf", "application/pdf", 10),
        ];
        let err = classify(files).unwrap_err();
        let msg = detail(err);
        assert!(msg.contains("anim.gif"));
        assert!(msg.contains("doc.pdf"));
        assert!(!msg.contains("ok.png"));
    }
}

//! Generated API documentation page served at `GET /api/docs`.

use crate::media::{MAX_IMAGE_SIZE_MB, MAX_VIDEO_SIZE_MB};

pub fn generate_api_docs_html() -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Media Story Captioner API</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; max-width: 860px; margin: 40px auto; padding: 0 20px; color: #333; }}
        h1 {{ color: #667eea; }}
        code, pre {{ background: #f8f9ff; border-radius: 6px; padding: 2px 6px; }}
        pre {{ padding: 14px; overflow-x: auto; }}
        table {{ border-collapse: collapse; width: 100%; margin: 16px 0; }}
        th, td {{ border: 1px solid #e0e0e0; padding: 8px 12px; text-align: left; }}
        th {{ background: #f8f9ff; }}
    </style>
</head>
<body>
    <h1>Media Story Captioner API</h1>
    <p>Generates a short bilingual (English/Thai) caption for uploaded media
    using a vision model, with token accounting.</p>

    <h2>POST /analyze/</h2>
    <p>Multipart form upload. Either one or more images, or exactly one video
    &mdash; never mixed.</p>
    <table>
        <tr><th>Field</th><th>Type</th><th>Notes</th></tr>
        <tr><td><code>files</code></td><td>file (repeated)</td>
            <td>JPG/PNG images up to {image_mb} MB each, or one MP4 video up to {video_mb} MB</td></tr>
        <tr><td><code>prompt</code></td><td>text (optional)</td>
            <td>Free-text guidance for the caption</td></tr>
    </table>

    <h3>Success response (200)</h3>
    <pre>{{
  "english": "A vivid 50-75 word caption...",
  "thai": "คำบรรยายภาษาไทย...",
  "input_tokens": 1234,
  "output_tokens": 98
}}</pre>

    <h3>Error responses</h3>
    <p>Non-2xx responses carry <code>{{"detail": "reason"}}</code>:</p>
    <table>
        <tr><th>Status</th><th>Cause</th></tr>
        <tr><td>400</td><td>No files, or an invalid image/video combination</td></tr>
        <tr><td>413</td><td>A file exceeds its size limit (named in the detail)</td></tr>
        <tr><td>415</td><td>Unsupported file type (offenders named in the detail)</td></tr>
    </table>
    <p>Model failures never produce an error response: the service substitutes
    a fixed placeholder caption and still returns 200.</p>

    <h2>GET /health</h2>
    <p>Liveness probe; returns <code>ok</code>.</p>
</body>
</html>
"#,
        image_mb = MAX_IMAGE_SIZE_MB,
        video_mb = MAX_VIDEO_SIZE_MB,
    )
}

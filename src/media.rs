//! Media encoding helpers: files and raw bytes to the base64 the model API expects, and back.

use std::path::Path;

use base64::Engine;
use bytes::Bytes;
use image::ImageFormat;

use crate::error::PipelineError;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

pub fn encode_bytes(data: &[u8]) -> String {
    B64.encode(data)
}

pub async fn file_to_base64(path: impl AsRef<Path>) -> Result<String, PipelineError> {
    let path = path.as_ref();
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::Validation(format!("cannot read image {}: {}", path.display(), e)))?;
    if data.is_empty() {
        return Err(PipelineError::Validation(format!("image {} is empty", path.display())));
    }
    Ok(encode_bytes(&data))
}

/// Accepts either bare base64 or a `data:<mime>;base64,<payload>` URL and returns the payload.
pub fn strip_data_url(input: &str) -> &str {
    let trimmed = input.trim();
    if trimmed.starts_with("data:") {
        if let Some((_, payload)) = trimmed.split_once(',') {
            return payload;
        }
    }
    trimmed
}

/// Normalises an uploaded image: strips any data-URL prefix and checks the payload decodes.
pub fn normalize_upload(input: &str) -> Result<String, PipelineError> {
    let payload = strip_data_url(input);
    if payload.is_empty() {
        return Err(PipelineError::Validation("Please upload a product image.".into()));
    }
    let decoded = decode(payload)?;
    if decoded.is_empty() {
        return Err(PipelineError::Validation("Please upload a product image.".into()));
    }
    Ok(payload.to_string())
}

pub fn decode(b64: &str) -> Result<Bytes, PipelineError> {
    B64.decode(strip_data_url(b64))
        .map(Bytes::from)
        .map_err(|e| PipelineError::Validation(format!("image is not valid base64: {e}")))
}

/// Best-effort MIME type for an image payload, defaulting to JPEG like the upload form.
pub fn sniff_image_mime(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Gif) => "image/gif",
        _ if data.starts_with(b"<svg") => "image/svg+xml",
        _ => "image/jpeg",
    }
}

/// Same as [`sniff_image_mime`] but from the base64 text, without decoding the whole payload.
pub fn sniff_base64_mime(b64: &str) -> &'static str {
    let payload = strip_data_url(b64);
    if payload.starts_with("iVBORw0KGgo") {
        "image/png"
    } else if payload.starts_with("/9j/") {
        "image/jpeg"
    } else if payload.starts_with("UklGR") {
        "image/webp"
    } else if payload.starts_with("PHN2Zyg") {
        "image/svg+xml"
    } else {
        "image/jpeg"
    }
}

/// `image/png` -> `png`, used to name uploaded objects.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        _ => "jpg",
    }
}

/// Short preview of a base64 payload for logs.
pub fn preview(b64: &str) -> String {
    if b64.len() > 50 {
        format!("{}...[{} chars total]", &b64[..50], b64.len())
    } else {
        b64.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn strips_data_url_prefix() {
        assert_eq!(strip_data_url("data:image/jpeg;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("  AAAA "), "AAAA");
    }

    #[test]
    fn normalize_rejects_empty_and_garbage() {
        assert!(matches!(normalize_upload(""), Err(PipelineError::Validation(_))));
        assert!(matches!(normalize_upload("data:image/png;base64,"), Err(PipelineError::Validation(_))));
        assert!(matches!(normalize_upload("not base64 !!"), Err(PipelineError::Validation(_))));
        let b64 = encode_bytes(PNG_HEADER);
        assert_eq!(normalize_upload(&format!("data:image/png;base64,{b64}")).unwrap(), b64);
    }

    #[test]
    fn sniffs_png_from_bytes_and_base64() {
        assert_eq!(sniff_image_mime(PNG_HEADER), "image/png");
        assert_eq!(sniff_base64_mime(&encode_bytes(PNG_HEADER)), "image/png");
        assert_eq!(sniff_image_mime(b"plain"), "image/jpeg");
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("application/octet-stream"), "jpg");
    }

    #[tokio::test]
    async fn encodes_file_contents() {
        let path = std::env::temp_dir().join(format!("listing-studio-{}.bin", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, PNG_HEADER).await.unwrap();
        let encoded = file_to_base64(&path).await.unwrap();
        assert_eq!(decode(&encoded).unwrap().as_ref(), PNG_HEADER);
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(file_to_base64(&path).await.is_err());
    }
}

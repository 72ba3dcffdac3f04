use std::path::Path;

use axum::extract::{multipart::Field, Multipart};
use bytes::{Bytes, BytesMut};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

pub const FIELD_NAME: &str = "avatar";
const ONLY_IMAGES: &str = "Only JPEG/JPG/PNG images are allowed";

/// A validated image ready to be stored.
#[derive(Debug)]
pub struct AvatarUpload {
    pub body: Bytes,
    pub content_type: String,
    pub ext: String,
}

impl AvatarUpload {
    /// `<user_id>_<unix_millis>.<ext>`
    pub fn object_key(&self, user_id: Uuid, now: OffsetDateTime) -> String {
        let millis = now.unix_timestamp_nanos() / 1_000_000;
        format!("{}_{}.{}", user_id, millis, self.ext)
    }
}

fn allowed_mime(ct: &str) -> bool {
    matches!(ct, "image/jpeg" | "image/jpg" | "image/png")
}

fn allowed_ext(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    matches!(ext.as_str(), "jpeg" | "jpg" | "png").then_some(ext)
}

/// Both the declared content type and the file extension must name an image.
pub fn check_type(file_name: Option<&str>, content_type: Option<&str>) -> Result<String, ApiError> {
    let ct = content_type.unwrap_or_default().to_ascii_lowercase();
    let ext = file_name.and_then(allowed_ext);
    match ext {
        Some(ext) if allowed_mime(&ct) => Ok(ext),
        _ => {
            warn!(?file_name, content_type = %ct, "avatar type rejected");
            Err(ApiError::upload_rejected(ONLY_IMAGES))
        }
    }
}

async fn read_limited(mut field: Field<'_>, max_bytes: usize) -> Result<Bytes, ApiError> {
    let mut buf = BytesMut::new();
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                // includes the transport body limit being hit
                warn!(error = %e, "avatar body unreadable");
                return Err(ApiError::upload_rejected("File too large or malformed upload"));
            }
        };
        if buf.len() + chunk.len() > max_bytes {
            warn!(max_bytes, "avatar too large");
            return Err(ApiError::upload_rejected("File too large"));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Pulls the `avatar` field out of the multipart body, enforcing type and size.
pub async fn read_avatar(mut mp: Multipart, max_bytes: usize) -> Result<AvatarUpload, ApiError> {
    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::upload_rejected("No file uploaded")),
            Err(e) => {
                warn!(error = %e, "multipart body unreadable");
                return Err(ApiError::upload_rejected("File too large or malformed upload"));
            }
        };
        if field.name() != Some(FIELD_NAME) {
            continue;
        }

        let ext = check_type(field.file_name(), field.content_type())?;
        let content_type = field.content_type().unwrap_or_default().to_ascii_lowercase();
        let body = read_limited(field, max_bytes).await?;
        if body.is_empty() {
            return Err(ApiError::upload_rejected("No file uploaded"));
        }
        return Ok(AvatarUpload {
            body,
            content_type,
            ext,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn accepts_matching_image_types() {
        assert_eq!(check_type(Some("me.png"), Some("image/png")).unwrap(), "png");
        assert_eq!(check_type(Some("ME.JPG"), Some("image/jpeg")).unwrap(), "jpg");
        assert_eq!(check_type(Some("a.jpeg"), Some("image/jpg")).unwrap(), "jpeg");
    }

    #[test]
    fn rejects_wrong_type_or_extension() {
        for (name, ct) in [
            (Some("a.gif"), Some("image/gif")),
            (Some("a.png"), Some("application/pdf")),
            (Some("a.exe"), Some("image/png")),
            (Some("noext"), Some("image/png")),
            (None, Some("image/png")),
            (Some("a.png"), None),
        ] {
            let err = check_type(name, ct).unwrap_err();
            assert!(matches!(err, ApiError::UploadRejected(ref m) if m == ONLY_IMAGES));
        }
    }

    #[test]
    fn object_key_embeds_user_and_millis() {
        let upload = AvatarUpload {
            body: Bytes::from_static(b"x"),
            content_type: "image/png".into(),
            ext: "png".into(),
        };
        let id = Uuid::nil();
        let key = upload.object_key(id, datetime!(2024-01-01 00:00:00.123 UTC));
        assert_eq!(key, format!("{}_1704067200123.png", id));
    }
}

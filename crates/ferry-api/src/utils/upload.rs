//! Multipart parsing for the upload route

use axum::extract::Multipart;
use bytes::Bytes;
use ferry_core::AppError;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Fields of `POST /files`.
#[derive(Debug)]
pub struct UploadForm {
    pub data: Bytes,
    pub filename: String,
    pub content_type: String,
    pub retention_units: Option<i32>,
    pub encrypted: bool,
}

fn parse_flag(value: &str) -> Result<bool, AppError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(AppError::InvalidInput(format!(
            "Invalid encrypted flag: {}",
            other
        ))),
    }
}

/// Read exactly one `file` field plus the optional `retention_units` and
/// `encrypted` fields. Unknown fields are ignored.
pub async fn extract_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut data: Option<Bytes> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut retention_units: Option<i32> = None;
    let mut encrypted = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to read multipart: {}", e)))?
    {
        let name = field.name().map(str::to_string).unwrap_or_default();
        match name.as_str() {
            "file" => {
                if data.is_some() {
                    return Err(AppError::InvalidInput(
                        "Multiple file fields are not allowed; send exactly one field named 'file'"
                            .to_string(),
                    ));
                }
                filename = field.file_name().map(str::to_string);
                content_type = field.content_type().map(str::to_string);
                data = Some(field.bytes().await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read file data: {}", e))
                })?);
            }
            "retention_units" => {
                let text = field.text().await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read retention_units: {}", e))
                })?;
                let units = text.trim().parse::<i32>().map_err(|_| {
                    AppError::InvalidInput("retention_units must be an integer".to_string())
                })?;
                retention_units = Some(units);
            }
            "encrypted" => {
                let text = field.text().await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read encrypted flag: {}", e))
                })?;
                encrypted = parse_flag(&text)?;
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| AppError::InvalidInput("No file provided".to_string()))?;
    Ok(UploadForm {
        data,
        filename: filename.unwrap_or_else(|| "unknown".to_string()),
        content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        retention_units,
        encrypted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_encrypted_flag() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag("1").unwrap());
        assert!(!parse_flag("false").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}

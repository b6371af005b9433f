use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Builds a `data:<mime>;base64,<payload>` URI.
pub fn encode(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Splits a base64 data URI into its MIME type and the still-encoded payload.
pub fn split(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    Some((mime_type, payload))
}

/// Decodes a base64 data URI into its MIME type and raw bytes.
pub fn decode(uri: &str) -> anyhow::Result<(String, Vec<u8>)> {
    let (mime_type, payload) =
        split(uri).ok_or_else(|| anyhow::anyhow!("not a base64 data URI"))?;
    let bytes = STANDARD.decode(payload)?;
    Ok((mime_type.to_string(), bytes))
}

/// File extension for the image types the backend produces.
pub fn image_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

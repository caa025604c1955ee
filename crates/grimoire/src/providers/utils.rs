use std::path::Path;

use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use super::configs::{ClientConfig, ANTHROPIC_VERSION};
use crate::errors::ClientError;

lazy_static! {
    static ref FUNCTION_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Tool names must match `[a-zA-Z0-9_-]+` to be accepted by chat-completion APIs
pub fn is_valid_function_name(name: &str) -> bool {
    FUNCTION_NAME.is_match(name)
}

/// Build the request headers for the provider the base URL points at.
///
/// Anthropic authenticates with `x-api-key` plus a version header; everyone else takes a
/// bearer token.
pub fn auth_headers(config: &ClientConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if config.is_anthropic() {
        if let Ok(key) = HeaderValue::from_str(&config.api_key) {
            headers.insert("x-api-key", key);
        }
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
    } else if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", config.api_key)) {
        headers.insert(AUTHORIZATION, bearer);
    }

    headers
}

/// Join the base URL with the chat-completions path
pub fn completions_url(base_url: &str) -> String {
    format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
}

/// MIME type for an image path, by extension; unknown extensions are treated as JPEG
pub fn image_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/jpeg",
    }
}

/// Read an image from disk and return it base64-encoded along with its MIME type
pub fn read_image_file<P: AsRef<Path>>(path: P) -> Result<(String, &'static str), ClientError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(ClientError::ReadImageFile)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok((encoded, image_mime_type(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_valid_function_name() {
        assert!(is_valid_function_name("hello-world"));
        assert!(is_valid_function_name("hello_world"));
        assert!(!is_valid_function_name("hello world"));
        assert!(!is_valid_function_name("hello@world"));
        assert!(!is_valid_function_name(""));
    }

    #[test]
    fn test_auth_headers_bearer() {
        let headers = auth_headers(&ClientConfig::new("secret", "https://api.x.ai"));
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer secret");
        assert!(headers.get("x-api-key").is_none());
    }

    #[test]
    fn test_auth_headers_anthropic() {
        let headers = auth_headers(&ClientConfig::new("secret", "https://api.anthropic.com"));
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
        assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_completions_url_trims_slash() {
        assert_eq!(
            completions_url("https://api.x.ai/"),
            "https://api.x.ai/v1/chat/completions"
        );
    }

    #[test]
    fn test_read_image_file() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"hello").unwrap();

        let (data, mime) = read_image_file(file.path()).unwrap();
        assert_eq!(data, "aGVsbG8=");
        assert_eq!(mime, "image/png");

        assert_eq!(image_mime_type(Path::new("a.JPEG")), "image/jpeg");
        assert_eq!(image_mime_type(Path::new("a.gif")), "image/jpeg");
        assert!(matches!(
            read_image_file("/definitely/not/here.png"),
            Err(ClientError::ReadImageFile(_))
        ));
    }
}

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use reqwest::blocking::Client as HttpClient;

use crate::error::EngineError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// The three shapes an image reference can take when it crosses the
/// collaborator boundary. Classified once, at the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Local(PathBuf),
    Remote(String),
    Inline { mime: String, data: String },
}

impl ImageRef {
    /// Classifies a textual image reference: an http(s) URL, a base64
    /// `data:image/...` URI, or an existing local file path. Anything else
    /// is unsupported.
    pub fn from_text(raw: &str) -> Result<Self, EngineError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(EngineError::UnsupportedSource(
                "empty image reference".to_string(),
            ));
        }
        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return Ok(Self::Remote(value.to_string()));
        }
        if lowered.starts_with("data:") {
            let (mime, data) = split_data_uri(value)?;
            return Ok(Self::Inline { mime, data });
        }
        let path = PathBuf::from(value);
        if path.is_file() {
            return Ok(Self::Local(path));
        }
        Err(EngineError::UnsupportedSource(truncate_text(value, 96)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "path",
            Self::Remote(_) => "url",
            Self::Inline { .. } => "data_url",
        }
    }
}

/// The canonical byte payload handed to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub file_name: String,
}

/// Resolves any `ImageRef` into raw bytes. Buffers are scoped to one
/// request; nothing is cached across calls.
#[derive(Debug, Clone)]
pub struct Normalizer {
    http: HttpClient,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        let http = HttpClient::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self { http }
    }

    pub fn resolve(&self, source: &ImageRef) -> Result<NormalizedImage, EngineError> {
        match source {
            ImageRef::Local(path) => {
                let bytes = fs::read(path).map_err(|err| EngineError::Fetch {
                    url: path.display().to_string(),
                    reason: err.to_string(),
                })?;
                let mime = mime_for_path(path).unwrap_or("image/png").to_string();
                let file_name = path
                    .file_name()
                    .and_then(|value| value.to_str())
                    .unwrap_or("image.png")
                    .to_string();
                Ok(NormalizedImage {
                    bytes,
                    mime,
                    file_name,
                })
            }
            ImageRef::Remote(url) => self.fetch_remote(url),
            ImageRef::Inline { mime, data } => {
                let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                    EngineError::Decode(format!("malformed base64 payload: {err}"))
                })?;
                let file_name = format!("inline.{}", extension_for_mime(mime));
                Ok(NormalizedImage {
                    bytes,
                    mime: mime.clone(),
                    file_name,
                })
            }
        }
    }

    fn fetch_remote(&self, url: &str) -> Result<NormalizedImage, EngineError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| EngineError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Fetch {
                url: url.to_string(),
                reason: format!("status {}", status.as_u16()),
            });
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| "image/png".to_string());
        let bytes = response
            .bytes()
            .map_err(|err| EngineError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            })?
            .to_vec();
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty() && segment.contains('.'))
            .unwrap_or("remote.png")
            .to_string();
        Ok(NormalizedImage {
            bytes,
            mime,
            file_name,
        })
    }
}

/// Geometric rule applied when scaling to target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitPolicy {
    /// Stretch exactly to the target canvas. Used around AI stylization,
    /// where the model's input/output canvas contract wins over aspect
    /// ratio.
    Fill,
    /// Scale to fit inside the target, centered on a transparent canvas of
    /// exactly the target size. Used for standalone resizes, where the
    /// subject must not be distorted.
    Inside,
}

/// Scales `bytes` to `width`x`height` under the given fit policy. Output
/// is always PNG.
pub fn resize_to(
    bytes: &[u8],
    width: u32,
    height: u32,
    policy: FitPolicy,
) -> Result<Vec<u8>, EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::Validation(
            "target dimensions must be positive".to_string(),
        ));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| EngineError::Decode(format!("unreadable image bytes: {err}")))?;
    let resized = match policy {
        FitPolicy::Fill => decoded.resize_exact(width, height, FilterType::Lanczos3),
        FitPolicy::Inside => {
            let scaled = decoded.resize(width, height, FilterType::Lanczos3).to_rgba8();
            let mut canvas = RgbaImage::new(width, height);
            let left = i64::from((width - scaled.width()) / 2);
            let top = i64::from((height - scaled.height()) / 2);
            image::imageops::overlay(&mut canvas, &scaled, left, top);
            DynamicImage::ImageRgba8(canvas)
        }
    };
    encode_png(&resized)
}

/// Builds the edit mask for fill-empty-space. The source is its own mask:
/// alpha-0 pixels mark the regions the collaborator may regenerate, fully
/// opaque pixels must be preserved verbatim. A source without any fully
/// transparent pixel has no empty space to fill, which is a legitimate
/// failure, not something to paper over.
pub fn alpha_mask(bytes: &[u8]) -> Result<Vec<u8>, EngineError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| EngineError::Decode(format!("unreadable image bytes: {err}")))?;
    let rgba = decoded.to_rgba8();
    if !rgba.pixels().any(|pixel| pixel[3] == 0) {
        return Err(EngineError::Ai(
            "image has no fully transparent pixels to fill".to_string(),
        ));
    }
    encode_png(&DynamicImage::ImageRgba8(rgba))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|err| EngineError::Decode(format!("png encode failed: {err}")))?;
    Ok(out)
}

pub fn to_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

fn split_data_uri(value: &str) -> Result<(String, String), EngineError> {
    let rest = value
        .strip_prefix("data:")
        .unwrap_or(value);
    let (header, payload) = rest.split_once(',').ok_or_else(|| {
        EngineError::Decode("data URI has no payload separator".to_string())
    })?;
    let mime = header.strip_suffix(";base64").ok_or_else(|| {
        EngineError::Decode("data URI is not base64 encoded".to_string())
    })?;
    if !mime.to_ascii_lowercase().starts_with("image/") {
        return Err(EngineError::Decode(format!(
            "data URI is not an image (mime '{mime}')"
        )));
    }
    Ok((mime.to_string(), payload.to_string()))
}

pub(crate) fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub(crate) fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

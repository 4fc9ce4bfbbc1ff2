pub mod error;
pub mod session;
pub mod source;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, Rgba, RgbaImage};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::EngineError;
use crate::source::{
    alpha_mask, encode_png, extension_for_mime, resize_to, to_data_uri, truncate_text, FitPolicy,
    NormalizedImage,
};

pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const PROMPT_EXPANSION_WORD_CAP: usize = 100;

/// Appended to every stylize prompt so the model edits instead of
/// repainting the whole image.
const STYLIZE_GUARDRAIL: &str = "Make ONLY the specific changes mentioned in the prompt while \
meticulously preserving the original content, proportions, layout, composition, and style. \
Apply minimal edits - the result should look nearly identical to the original except for the \
requested changes. Maintain the highest quality of the original image, avoiding any stretching \
or distortion.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub image_id: String,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub image_url: String,
    pub explanation: String,
}

#[derive(Debug, Clone)]
pub struct StylizeRequest {
    pub session_dir: PathBuf,
    pub source: NormalizedImage,
    pub prompt: String,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LogoRequest {
    pub session_dir: PathBuf,
    pub prompt: String,
    pub style: String,
}

#[derive(Debug, Clone)]
pub struct FillRequest {
    pub session_dir: PathBuf,
    pub source: NormalizedImage,
    pub fill_prompt: String,
}

#[derive(Debug, Clone)]
pub struct ResizeRequest {
    pub session_dir: PathBuf,
    pub source: NormalizedImage,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub input_text: String,
    pub image: Option<NormalizedImage>,
}

/// The external AI image-edit service, reduced to the operation contracts
/// the session depends on. `upload` and `resize` are provider-free
/// plumbing and ship as default implementations.
pub trait EditCollaborator: Send + Sync {
    fn name(&self) -> &str;

    fn stylize(&self, request: &StylizeRequest) -> Result<EditOutcome, EngineError>;

    fn generate_logo(&self, request: &LogoRequest) -> Result<EditOutcome, EngineError>;

    /// Returns a data URI: filled output must stay self-contained.
    fn fill_empty_space(&self, request: &FillRequest) -> Result<EditOutcome, EngineError>;

    /// Expands terse input into a richer prompt of at most 100 words.
    fn generate_prompt(&self, request: &PromptRequest) -> Result<String, EngineError>;

    /// Persists raw upload bytes under `<session_dir>/images/`.
    fn upload(
        &self,
        session_dir: &Path,
        bytes: &[u8],
        file_name: &str,
        mime: &str,
    ) -> Result<UploadReceipt, EngineError> {
        if !mime.to_ascii_lowercase().starts_with("image/") {
            return Err(EngineError::Validation(
                "Please upload a valid image file".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(EngineError::Validation(
                "Uploaded file is empty".to_string(),
            ));
        }
        let image_id = Uuid::new_v4().to_string();
        let dir = session_dir.join("images");
        fs::create_dir_all(&dir).map_err(|err| {
            EngineError::Transport(format!("failed creating {}: {err}", dir.display()))
        })?;
        let path = dir.join(format!("{image_id}.{}", extension_for_mime(mime)));
        fs::write(&path, bytes).map_err(|err| {
            EngineError::Transport(format!("failed writing {}: {err}", path.display()))
        })?;
        Ok(UploadReceipt {
            image_id,
            image_url: path.to_string_lossy().to_string(),
        })
    }

    /// Purely geometric: preserves aspect ratio and pads transparent
    /// borders instead of cropping or stretching.
    fn resize(&self, request: &ResizeRequest) -> Result<EditOutcome, EngineError> {
        let bytes = resize_to(
            &request.source.bytes,
            request.width,
            request.height,
            FitPolicy::Inside,
        )?;
        let path = write_artifact(&request.session_dir, "resized", &bytes)?;
        Ok(EditOutcome {
            image_url: path.to_string_lossy().to_string(),
            explanation: format!("Image resized to {}x{}.", request.width, request.height),
        })
    }
}

/// OpenAI-backed collaborator over the blocking HTTP client. Single-shot
/// calls with an explicit timeout, no retries.
pub struct OpenAiCollaborator {
    api_base: String,
    image_model: String,
    text_model: String,
    http: HttpClient,
}

impl Default for OpenAiCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiCollaborator {
    pub fn new() -> Self {
        Self {
            api_base: env::var("OPENAI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            image_model: non_empty_env("GLAZE_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            text_model: non_empty_env("GLAZE_TEXT_MODEL")
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            http: HttpClient::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| HttpClient::new()),
        }
    }

    fn api_key() -> Result<String, EngineError> {
        non_empty_env("OPENAI_API_KEY")
            .ok_or_else(|| EngineError::Validation("OPENAI_API_KEY is not set".to_string()))
    }

    fn image_part(source: &NormalizedImage) -> Result<MultipartPart, EngineError> {
        MultipartPart::bytes(source.bytes.clone())
            .file_name(source.file_name.clone())
            .mime_str(&source.mime)
            .map_err(|err| {
                EngineError::Validation(format!("invalid mime '{}': {err}", source.mime))
            })
    }

    fn post_multipart(
        &self,
        endpoint: &str,
        api_key: &str,
        form: MultipartForm,
    ) -> Result<Value, EngineError> {
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .map_err(transport_error)?;
        response_json_or_error(endpoint, response)
    }

    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<Value, EngineError> {
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .map_err(transport_error)?;
        response_json_or_error(endpoint, response)
    }

    /// Pulls the first image out of an images-API response: inline base64
    /// first, a downloadable URL as fallback.
    fn first_image_bytes(&self, payload: &Value) -> Result<Vec<u8>, EngineError> {
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in rows {
            if let Some(b64) = row.get("b64_json").and_then(Value::as_str) {
                return BASE64.decode(b64.as_bytes()).map_err(|err| {
                    EngineError::Decode(format!("provider image base64 decode failed: {err}"))
                });
            }
            if let Some(url) = row.get("url").and_then(Value::as_str) {
                return self.download_image(url);
            }
        }
        Err(EngineError::Ai(
            "No image data received from the image edit API".to_string(),
        ))
    }

    fn download_image(&self, url: &str) -> Result<Vec<u8>, EngineError> {
        let response = self.http.get(url).send().map_err(|err| EngineError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(EngineError::Fetch {
                url: url.to_string(),
                reason: format!("status {}", response.status().as_u16()),
            });
        }
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| EngineError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }
}

impl EditCollaborator for OpenAiCollaborator {
    fn name(&self) -> &str {
        "openai"
    }

    fn stylize(&self, request: &StylizeRequest) -> Result<EditOutcome, EngineError> {
        let api_key = Self::api_key()?;
        let endpoint = format!("{}/images/edits", self.api_base);
        let prompt = format!("{}. {STYLIZE_GUARDRAIL}", request.prompt);
        let form = MultipartForm::new()
            .text("model", self.image_model.clone())
            .text("prompt", prompt)
            .text("quality", "high")
            .part("image", Self::image_part(&request.source)?);

        let payload = self.post_multipart(&endpoint, &api_key, form)?;
        let mut bytes = self.first_image_bytes(&payload)?;
        if let (Some(width), Some(height)) = (request.target_width, request.target_height) {
            bytes = resize_to(&bytes, width, height, FitPolicy::Fill)?;
        }
        let path = write_artifact(&request.session_dir, "artifact", &bytes)?;
        Ok(EditOutcome {
            image_url: path.to_string_lossy().to_string(),
            explanation: format!(
                "Image stylized using {} in the style of '{}', preserving the original content.",
                self.image_model, request.prompt
            ),
        })
    }

    fn generate_logo(&self, request: &LogoRequest) -> Result<EditOutcome, EngineError> {
        let api_key = Self::api_key()?;
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": self.image_model,
            "prompt": format!(
                "A logo: {}. Visual style: {}. Clean composition on a plain background.",
                request.prompt, request.style
            ),
            "n": 1,
            "size": "1024x1024",
        });

        let response = self.post_json(&endpoint, &api_key, &payload)?;
        let bytes = self.first_image_bytes(&response)?;
        let path = write_artifact(&request.session_dir, "logo", &bytes)?;
        Ok(EditOutcome {
            image_url: path.to_string_lossy().to_string(),
            explanation: format!(
                "Logo generated in the '{}' style for '{}'.",
                request.style, request.prompt
            ),
        })
    }

    fn fill_empty_space(&self, request: &FillRequest) -> Result<EditOutcome, EngineError> {
        let api_key = Self::api_key()?;
        let mask = alpha_mask(&request.source.bytes)?;
        let endpoint = format!("{}/images/edits", self.api_base);
        let mask_part = MultipartPart::bytes(mask)
            .file_name("mask.png")
            .mime_str("image/png")
            .map_err(|err| EngineError::Validation(format!("invalid mask mime: {err}")))?;
        let form = MultipartForm::new()
            .text("model", self.image_model.clone())
            .text(
                "prompt",
                format!(
                    "Fill the transparent regions with: {}. Keep every opaque pixel exactly as it is.",
                    request.fill_prompt
                ),
            )
            .part("image", Self::image_part(&request.source)?)
            .part("mask", mask_part);

        let payload = self.post_multipart(&endpoint, &api_key, form)?;
        let bytes = self.first_image_bytes(&payload)?;
        Ok(EditOutcome {
            image_url: to_data_uri(&bytes, "image/png"),
            explanation: format!(
                "Filled the transparent regions with '{}'.",
                request.fill_prompt
            ),
        })
    }

    fn generate_prompt(&self, request: &PromptRequest) -> Result<String, EngineError> {
        let input = request.input_text.trim();
        if input.is_empty() {
            return Err(EngineError::Validation(
                "No input text provided".to_string(),
            ));
        }
        let api_key = Self::api_key()?;
        let endpoint = format!("{}/chat/completions", self.api_base);
        let user_content = match &request.image {
            Some(image) => json!([
                { "type": "text", "text": input },
                {
                    "type": "image_url",
                    "image_url": { "url": to_data_uri(&image.bytes, &image.mime) }
                }
            ]),
            None => Value::String(input.to_string()),
        };
        let payload = json!({
            "model": self.text_model,
            "messages": [
                {
                    "role": "system",
                    "content": "You expand terse image descriptions into rich, specific \
image-generation prompts. Respond with the prompt only, at most 100 words."
                },
                { "role": "user", "content": user_content }
            ],
        });

        let response = self.post_json(&endpoint, &api_key, &payload)?;
        let content = response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if content.is_empty() {
            return Err(EngineError::Ai(
                "Prompt expansion returned empty content".to_string(),
            ));
        }
        Ok(cap_words(content, PROMPT_EXPANSION_WORD_CAP))
    }
}

/// Fully offline collaborator: deterministic placeholder artifacts, no
/// network. Stands in for the real provider in tests and keyless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunCollaborator;

impl EditCollaborator for DryrunCollaborator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn stylize(&self, request: &StylizeRequest) -> Result<EditOutcome, EngineError> {
        let (source_width, source_height) = image_dims(&request.source.bytes)?;
        let width = request.target_width.unwrap_or(source_width);
        let height = request.target_height.unwrap_or(source_height);
        let bytes = placeholder_png(&request.prompt, width, height)?;
        let path = write_artifact(&request.session_dir, "artifact", &bytes)?;
        Ok(EditOutcome {
            image_url: path.to_string_lossy().to_string(),
            explanation: format!("Image stylized offline in the style of '{}'.", request.prompt),
        })
    }

    fn generate_logo(&self, request: &LogoRequest) -> Result<EditOutcome, EngineError> {
        let bytes = placeholder_png(&format!("{} {}", request.style, request.prompt), 512, 512)?;
        let path = write_artifact(&request.session_dir, "logo", &bytes)?;
        Ok(EditOutcome {
            image_url: path.to_string_lossy().to_string(),
            explanation: format!(
                "Logo generated offline in the '{}' style for '{}'.",
                request.style, request.prompt
            ),
        })
    }

    fn fill_empty_space(&self, request: &FillRequest) -> Result<EditOutcome, EngineError> {
        // Same precondition as the real provider: no transparency, no fill.
        alpha_mask(&request.source.bytes)?;
        let decoded = image::load_from_memory(&request.source.bytes)
            .map_err(|err| EngineError::Decode(format!("unreadable image bytes: {err}")))?;
        let mut rgba = decoded.to_rgba8();
        let (r, g, b) = color_from_prompt(&request.fill_prompt);
        for pixel in rgba.pixels_mut() {
            if pixel[3] == 0 {
                *pixel = Rgba([r, g, b, 255]);
            }
        }
        let bytes = encode_png(&DynamicImage::ImageRgba8(rgba))?;
        Ok(EditOutcome {
            image_url: to_data_uri(&bytes, "image/png"),
            explanation: format!(
                "Filled the transparent regions offline with '{}'.",
                request.fill_prompt
            ),
        })
    }

    fn generate_prompt(&self, request: &PromptRequest) -> Result<String, EngineError> {
        let input = request.input_text.trim();
        if input.is_empty() {
            return Err(EngineError::Validation(
                "No input text provided".to_string(),
            ));
        }
        let expanded = format!(
            "{input}, rendered as a detailed high-resolution illustration with balanced \
composition, natural lighting, and a coherent color palette"
        );
        Ok(cap_words(&expanded, PROMPT_EXPANSION_WORD_CAP))
    }
}

fn write_artifact(session_dir: &Path, stem: &str, bytes: &[u8]) -> Result<PathBuf, EngineError> {
    let dir = session_dir.join("images");
    fs::create_dir_all(&dir).map_err(|err| {
        EngineError::Transport(format!("failed creating {}: {err}", dir.display()))
    })?;
    let tag = Uuid::new_v4().simple().to_string();
    let path = dir.join(format!("{stem}-{}-{}.png", timestamp_millis(), &tag[..8]));
    fs::write(&path, bytes).map_err(|err| {
        EngineError::Transport(format!("failed writing {}: {err}", path.display()))
    })?;
    Ok(path)
}

fn response_json_or_error(endpoint: &str, response: HttpResponse) -> Result<Value, EngineError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| EngineError::Transport(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(EngineError::Ai(format!(
            "request to {endpoint} failed ({code}): {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| EngineError::Decode(format!("provider returned invalid JSON: {err}")))
}

fn transport_error(err: reqwest::Error) -> EngineError {
    EngineError::Transport(err.to_string())
}

fn placeholder_png(prompt: &str, width: u32, height: u32) -> Result<Vec<u8>, EngineError> {
    let (r, g, b) = color_from_prompt(prompt);
    let mut canvas = RgbaImage::new(width.max(1), height.max(1));
    for pixel in canvas.pixels_mut() {
        *pixel = Rgba([r, g, b, 255]);
    }
    encode_png(&DynamicImage::ImageRgba8(canvas))
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn image_dims(bytes: &[u8]) -> Result<(u32, u32), EngineError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| EngineError::Decode(format!("unreadable image bytes: {err}")))?;
    Ok((decoded.width(), decoded.height()))
}

fn cap_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.trim().to_string();
    }
    words[..max_words].join(" ")
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::{
        cap_words, color_from_prompt, DryrunCollaborator, EditCollaborator, FillRequest,
        PromptRequest, StylizeRequest,
    };
    use crate::error::EngineError;
    use crate::source::{encode_png, NormalizedImage};

    fn sample_image(width: u32, height: u32, alpha: u8) -> NormalizedImage {
        let mut canvas = RgbaImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgba([10, 20, 30, alpha]);
        }
        NormalizedImage {
            bytes: encode_png(&DynamicImage::ImageRgba8(canvas)).expect("encode"),
            mime: "image/png".to_string(),
            file_name: "sample.png".to_string(),
        }
    }

    #[test]
    fn default_upload_validates_the_mime_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let collaborator = DryrunCollaborator;

        let err = collaborator
            .upload(temp.path(), b"raw", "notes.txt", "text/plain")
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let receipt = collaborator.upload(temp.path(), b"png-bytes", "cat.png", "image/png")?;
        assert!(receipt.image_url.ends_with(".png"));
        assert_eq!(std::fs::read(&receipt.image_url)?, b"png-bytes");
        Ok(())
    }

    #[test]
    fn default_resize_pads_instead_of_stretching() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let outcome = DryrunCollaborator.resize(&super::ResizeRequest {
            session_dir: temp.path().to_path_buf(),
            source: sample_image(10, 10, 255),
            width: 40,
            height: 20,
        })?;
        let decoded = image::open(&outcome.image_url)?.to_rgba8();
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
        assert_eq!(decoded.get_pixel(0, 10)[3], 0);
        assert_eq!(decoded.get_pixel(20, 10)[3], 255);
        assert_eq!(outcome.explanation, "Image resized to 40x20.");
        Ok(())
    }

    #[test]
    fn dryrun_stylize_writes_a_deterministic_placeholder() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let outcome = DryrunCollaborator.stylize(&StylizeRequest {
            session_dir: temp.path().to_path_buf(),
            source: sample_image(6, 4, 255),
            prompt: "make it a watercolor".to_string(),
            target_width: None,
            target_height: None,
        })?;
        let decoded = image::open(&outcome.image_url)?.to_rgba8();
        assert_eq!((decoded.width(), decoded.height()), (6, 4));
        let (r, g, b) = color_from_prompt("make it a watercolor");
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([r, g, b, 255]));
        Ok(())
    }

    #[test]
    fn dryrun_stylize_honors_target_dimensions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let outcome = DryrunCollaborator.stylize(&StylizeRequest {
            session_dir: temp.path().to_path_buf(),
            source: sample_image(6, 4, 255),
            prompt: "p".to_string(),
            target_width: Some(32),
            target_height: Some(16),
        })?;
        let decoded = image::open(&outcome.image_url)?;
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
        Ok(())
    }

    #[test]
    fn dryrun_fill_requires_transparency_and_returns_a_data_uri() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;

        let opaque = DryrunCollaborator.fill_empty_space(&FillRequest {
            session_dir: temp.path().to_path_buf(),
            source: sample_image(4, 4, 255),
            fill_prompt: "clouds".to_string(),
        });
        assert!(matches!(opaque.unwrap_err(), EngineError::Ai(_)));

        let outcome = DryrunCollaborator.fill_empty_space(&FillRequest {
            session_dir: temp.path().to_path_buf(),
            source: sample_image(4, 4, 0),
            fill_prompt: "clouds".to_string(),
        })?;
        assert!(outcome.image_url.starts_with("data:image/png;base64,"));
        Ok(())
    }

    #[test]
    fn dryrun_prompt_expansion_caps_at_one_hundred_words() {
        let input = "cat ".repeat(120);
        let expanded = DryrunCollaborator
            .generate_prompt(&PromptRequest {
                input_text: input,
                image: None,
            })
            .expect("expansion");
        assert!(expanded.split_whitespace().count() <= 100);

        let err = DryrunCollaborator
            .generate_prompt(&PromptRequest {
                input_text: "  ".to_string(),
                image: None,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn cap_words_keeps_short_text_intact() {
        assert_eq!(cap_words("a short prompt", 100), "a short prompt");
        assert_eq!(cap_words("one two three four", 2), "one two");
    }
}

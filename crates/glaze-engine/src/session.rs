use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use uuid::Uuid;

use glaze_contracts::events::{EventPayload, EventWriter};
use glaze_contracts::session::{ImageVersion, Transcript, VersionHistory};

use crate::error::EngineError;
use crate::source::{mime_for_path, ImageRef, NormalizedImage, Normalizer};
use crate::{EditCollaborator, FillRequest, PromptRequest, ResizeRequest, StylizeRequest};

const STYLIZE_DEFAULT_NOTE: &str = "I've stylized your image based on your request.";
const STYLIZE_FAILURE_NOTE: &str =
    "Sorry, I encountered an error processing your request. Please try again.";
const REGENERATE_DEFAULT_NOTE: &str = "I've regenerated a new version with the same style.";
const REGENERATE_FAILURE_NOTE: &str =
    "Sorry, I encountered an error regenerating the image. Please try again.";
const FILL_DEFAULT_NOTE: &str =
    "I've filled the empty space in your image based on your request.";
const FILL_FAILURE_NOTE: &str = "Sorry, I encountered an error filling the empty space. \
The image may not have any transparent areas.";
const RESIZE_DIMENSIONS_REQUIRED: &str = "Select target dimensions before resizing.";
const RESIZE_FEEDBACK_NOTE: &str = "Resized from original state.";

/// Target canvas for resize and stylize. Construction refuses zero on
/// either axis, so a held value is always usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::Validation(
                "Dimensions must be positive on both axes".to_string(),
            ));
        }
        Ok(Self { width, height })
    }
}

/// Raw bytes of the most recent upload, kept so the first stylize can
/// operate on the exact pixels the user provided.
#[derive(Debug, Clone)]
struct UploadedImageInfo {
    bytes: Vec<u8>,
    file_name: String,
    mime: String,
}

/// How a session action resolved.
///
/// `Rejected` is a precondition failure reported before any work starts;
/// `Failed` is a collaborator or IO failure after the action began. Both
/// leave their message in the session error slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Committed,
    NoOp,
    Rejected(String),
    Failed(String),
}

/// Owns one editing session end to end: the uploaded image, the linear
/// version history, the chat transcript, and the single-flight busy gate.
/// All mutation goes through the action methods; each one either commits
/// history and transcript together or leaves both untouched.
pub struct SessionController {
    session_id: String,
    session_dir: PathBuf,
    collaborator: Box<dyn EditCollaborator>,
    normalizer: Normalizer,
    events: EventWriter,
    uploaded: Option<UploadedImageInfo>,
    history: VersionHistory,
    transcript: Transcript,
    busy: bool,
    error: Option<String>,
    dimensions: Option<Dimensions>,
}

impl SessionController {
    pub fn new(session_dir: impl Into<PathBuf>, collaborator: Box<dyn EditCollaborator>) -> Self {
        let session_dir = session_dir.into();
        let session_id = Uuid::new_v4().to_string();
        let events = EventWriter::new(session_dir.join("events.jsonl"), session_id.clone());
        Self {
            session_id,
            session_dir,
            collaborator,
            normalizer: Normalizer::new(),
            events,
            uploaded: None,
            history: VersionHistory::new(),
            transcript: Transcript::new(),
            busy: false,
            error: None,
            dimensions: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn history(&self) -> &VersionHistory {
        &self.history
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    pub fn collaborator_name(&self) -> &str {
        self.collaborator.name()
    }

    /// Registers a new upload. The first upload seeds the history; later
    /// uploads append a fresh entry annotated as such. A rejected upload
    /// leaves the transcript untouched and only records the error.
    pub fn upload(&mut self, bytes: Vec<u8>, file_name: &str, mime: &str) -> ActionOutcome {
        if self.busy {
            return ActionOutcome::NoOp;
        }
        self.busy = true;
        let result = self
            .collaborator
            .upload(&self.session_dir, &bytes, file_name, mime);
        self.busy = false;
        match result {
            Ok(receipt) => {
                let version = if self.history.is_empty() {
                    ImageVersion::original(&receipt.image_url)
                } else {
                    ImageVersion::annotated(
                        &receipt.image_url,
                        None,
                        Some(format!("New upload: {file_name}")),
                    )
                };
                let index = self.history.len();
                self.history.push_current(version);
                self.transcript.push_assistant_with_image(
                    format!(
                        "New image uploaded: {file_name}. You can now describe how you want to \
stylize it."
                    ),
                    &receipt.image_url,
                );
                self.uploaded = Some(UploadedImageInfo {
                    bytes,
                    file_name: file_name.to_string(),
                    mime: mime.to_string(),
                });
                self.error = None;
                self.emit(
                    "image_uploaded",
                    json!({
                        "file_name": file_name,
                        "image_url": receipt.image_url,
                        "image_id": receipt.image_id,
                        "version_index": index,
                    }),
                );
                ActionOutcome::Committed
            }
            Err(err) => {
                let message = err.to_string();
                self.error = Some(message.clone());
                self.emit("upload_failed", json!({ "error": message }));
                ActionOutcome::Failed(message)
            }
        }
    }

    /// Reads and uploads a local file, inferring the mime type from its
    /// extension.
    pub fn upload_file(&mut self, path: &Path) -> ActionOutcome {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                let message = format!("failed reading {}: {err}", path.display());
                self.error = Some(message.clone());
                self.emit("upload_failed", json!({ "error": message }));
                return ActionOutcome::Failed(message);
            }
        };
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("upload.png")
            .to_string();
        let mime = mime_for_path(path).unwrap_or("image/png").to_string();
        self.upload(bytes, &file_name, &mime)
    }

    /// Stylizes the current image with a free-text prompt. Commits a new
    /// version and an assistant reply together, or records the failure in
    /// chat without touching the history.
    pub fn send_message(&mut self, text: &str) -> ActionOutcome {
        if self.busy {
            return ActionOutcome::NoOp;
        }
        let prompt = text.trim();
        if prompt.is_empty() {
            return self.reject("Enter a description of the changes you want");
        }
        if self.history.current().is_none() {
            return self.reject("Upload an image before describing changes");
        }

        self.transcript.push_user(prompt);
        self.busy = true;
        self.emit("stylize_requested", json!({ "prompt": prompt }));
        let result = self.current_source().and_then(|source| {
            self.collaborator.stylize(&StylizeRequest {
                session_dir: self.session_dir.clone(),
                source,
                prompt: prompt.to_string(),
                target_width: self.dimensions.map(|dims| dims.width),
                target_height: self.dimensions.map(|dims| dims.height),
            })
        });
        self.busy = false;
        match result {
            Ok(outcome) => {
                let index = self.history.len();
                self.history
                    .push_current(ImageVersion::edited(&outcome.image_url, prompt));
                let note = defaulted(&outcome.explanation, STYLIZE_DEFAULT_NOTE);
                self.transcript
                    .push_assistant_with_image(note, &outcome.image_url);
                self.error = None;
                self.emit(
                    "stylize_committed",
                    json!({ "image_url": outcome.image_url, "version_index": index }),
                );
                ActionOutcome::Committed
            }
            Err(err) => self.fail_action("stylize_failed", STYLIZE_FAILURE_NOTE, err),
        }
    }

    /// Re-runs the current version's prompt against the current image.
    /// A no-op on the original upload, which has no prompt to replay.
    pub fn regenerate(&mut self) -> ActionOutcome {
        if self.busy {
            return ActionOutcome::NoOp;
        }
        let prompt = match self.history.current().and_then(|version| version.prompt.clone()) {
            Some(prompt) => prompt,
            None => return ActionOutcome::NoOp,
        };

        self.busy = true;
        self.emit("regenerate_requested", json!({ "prompt": prompt }));
        let result = self.current_source().and_then(|source| {
            self.collaborator.stylize(&StylizeRequest {
                session_dir: self.session_dir.clone(),
                source,
                prompt: prompt.clone(),
                target_width: self.dimensions.map(|dims| dims.width),
                target_height: self.dimensions.map(|dims| dims.height),
            })
        });
        self.busy = false;
        match result {
            Ok(outcome) => {
                let index = self.history.len();
                self.history
                    .push_current(ImageVersion::edited(&outcome.image_url, &prompt));
                let note = defaulted(&outcome.explanation, REGENERATE_DEFAULT_NOTE);
                self.transcript
                    .push_assistant_with_image(note, &outcome.image_url);
                self.error = None;
                self.emit(
                    "regenerate_committed",
                    json!({ "image_url": outcome.image_url, "version_index": index }),
                );
                ActionOutcome::Committed
            }
            Err(err) => self.fail_action("regenerate_failed", REGENERATE_FAILURE_NOTE, err),
        }
    }

    /// Resizes the current image to the selected dimensions, preserving
    /// aspect ratio with transparent padding.
    pub fn resize_current(&mut self) -> ActionOutcome {
        if self.busy {
            return ActionOutcome::NoOp;
        }
        let dims = match (self.history.current(), self.dimensions) {
            (Some(_), Some(dims)) => dims,
            _ => return self.reject(RESIZE_DIMENSIONS_REQUIRED),
        };

        self.busy = true;
        let prompt = self.history.current().and_then(|version| version.prompt.clone());
        let result = self.current_source().and_then(|source| {
            self.collaborator.resize(&ResizeRequest {
                session_dir: self.session_dir.clone(),
                source,
                width: dims.width,
                height: dims.height,
            })
        });
        self.busy = false;
        match result {
            Ok(outcome) => {
                let index = self.history.len();
                self.history.push_current(ImageVersion::annotated(
                    &outcome.image_url,
                    prompt,
                    Some(RESIZE_FEEDBACK_NOTE.to_string()),
                ));
                self.transcript.push_assistant_with_image(
                    format!("Image resized to {}x{}.", dims.width, dims.height),
                    &outcome.image_url,
                );
                self.error = None;
                self.emit(
                    "resize_committed",
                    json!({
                        "image_url": outcome.image_url,
                        "width": dims.width,
                        "height": dims.height,
                        "version_index": index,
                    }),
                );
                ActionOutcome::Committed
            }
            Err(err) => {
                let note = format!("Sorry, I encountered an error resizing the image: {err}");
                self.fail_action("resize_failed", &note, err)
            }
        }
    }

    /// Fills fully transparent regions of the current image from a text
    /// prompt. The result is committed as a self-contained data URI.
    pub fn fill_empty_space(&mut self, fill_prompt: &str) -> ActionOutcome {
        if self.busy {
            return ActionOutcome::NoOp;
        }
        let fill_prompt = fill_prompt.trim();
        if fill_prompt.is_empty() {
            return self.reject("Enter a description of what should fill the empty space");
        }
        if self.history.current().is_none() {
            return self.reject("Upload an image before filling empty space");
        }

        let prompt = format!("Fill empty space: {fill_prompt}");
        self.busy = true;
        self.emit("fill_requested", json!({ "prompt": fill_prompt }));
        let result = self.current_source().and_then(|source| {
            self.collaborator.fill_empty_space(&FillRequest {
                session_dir: self.session_dir.clone(),
                source,
                fill_prompt: fill_prompt.to_string(),
            })
        });
        self.busy = false;
        match result {
            Ok(outcome) => {
                let index = self.history.len();
                self.history
                    .push_current(ImageVersion::edited(&outcome.image_url, &prompt));
                let note = defaulted(&outcome.explanation, FILL_DEFAULT_NOTE);
                self.transcript
                    .push_assistant_with_image(note, &outcome.image_url);
                self.error = None;
                self.emit("fill_committed", json!({ "version_index": index }));
                ActionOutcome::Committed
            }
            Err(err) => self.fail_action("fill_failed", FILL_FAILURE_NOTE, err),
        }
    }

    /// Moves the view cursor one version back. Pure navigation: no chat
    /// message, no collaborator call, allowed regardless of other state.
    pub fn view_previous(&mut self) -> ActionOutcome {
        if self.history.view_previous() {
            self.emit(
                "history_navigated",
                json!({ "direction": "previous", "index": self.history.current_index() }),
            );
            ActionOutcome::Committed
        } else {
            ActionOutcome::NoOp
        }
    }

    /// Moves the view cursor one version forward.
    pub fn view_next(&mut self) -> ActionOutcome {
        if self.history.view_next() {
            self.emit(
                "history_navigated",
                json!({ "direction": "next", "index": self.history.current_index() }),
            );
            ActionOutcome::Committed
        } else {
            ActionOutcome::NoOp
        }
    }

    pub fn update_dimensions(&mut self, width: u32, height: u32) -> ActionOutcome {
        match Dimensions::new(width, height) {
            Ok(dims) => {
                self.dimensions = Some(dims);
                self.emit(
                    "dimensions_updated",
                    json!({ "width": width, "height": height }),
                );
                ActionOutcome::Committed
            }
            Err(err) => self.reject(&err.to_string()),
        }
    }

    pub fn clear_dimensions(&mut self) {
        self.dimensions = None;
    }

    /// Saves the current version into `dir` as a PNG named after the
    /// prompt that produced it.
    pub fn download_current(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        let current = self
            .history
            .current()
            .ok_or_else(|| EngineError::Validation("No image to download yet".to_string()))?;
        let source = ImageRef::from_text(&current.url)?;
        let normalized = self.normalizer.resolve(&source)?;
        fs::create_dir_all(dir).map_err(|err| {
            EngineError::Transport(format!("failed creating {}: {err}", dir.display()))
        })?;
        let path = dir.join(download_file_name(current.prompt.as_deref()));
        fs::write(&path, &normalized.bytes).map_err(|err| {
            EngineError::Transport(format!("failed writing {}: {err}", path.display()))
        })?;
        Ok(path)
    }

    /// Expands terse input into a richer prompt, passing along the current
    /// image for context when one is available.
    pub fn expand_prompt(&mut self, text: &str) -> Result<String, EngineError> {
        let image = if self.history.current().is_some() {
            self.current_source().ok()
        } else {
            None
        };
        let result = self.collaborator.generate_prompt(&PromptRequest {
            input_text: text.to_string(),
            image,
        });
        if let Err(err) = &result {
            self.emit(
                "prompt_expansion_failed",
                json!({ "error": err.to_string() }),
            );
        }
        result
    }

    /// The pixels the next edit should start from. The original upload
    /// keeps its exact raw bytes; any later version is re-resolved from
    /// its stored reference.
    fn current_source(&self) -> Result<NormalizedImage, EngineError> {
        let index = self.history.current_index().ok_or_else(|| {
            EngineError::Validation("No image in the session yet".to_string())
        })?;
        if index == 0 {
            if let Some(uploaded) = &self.uploaded {
                return Ok(NormalizedImage {
                    bytes: uploaded.bytes.clone(),
                    mime: uploaded.mime.clone(),
                    file_name: uploaded.file_name.clone(),
                });
            }
        }
        let current = self.history.current().ok_or_else(|| {
            EngineError::Validation("No image in the session yet".to_string())
        })?;
        let source = ImageRef::from_text(&current.url)?;
        self.normalizer.resolve(&source)
    }

    fn reject(&mut self, message: &str) -> ActionOutcome {
        self.error = Some(message.to_string());
        ActionOutcome::Rejected(message.to_string())
    }

    fn fail_action(&mut self, event_type: &str, note: &str, err: EngineError) -> ActionOutcome {
        let message = err.to_string();
        self.transcript.push_assistant(note);
        self.error = Some(message.clone());
        self.emit(event_type, json!({ "error": message }));
        ActionOutcome::Failed(message)
    }

    // Event logging is best effort and never fails an action.
    fn emit(&self, event_type: &str, payload: Value) {
        let payload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        let _ = self.events.emit(event_type, payload);
    }
}

fn download_file_name(prompt: Option<&str>) -> String {
    let slug = match prompt {
        Some(prompt) if !prompt.trim().is_empty() => prompt
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .chars()
            .take(30)
            .collect::<String>(),
        _ => "original".to_string(),
    };
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("stylized_{slug}_{millis}.png")
}

fn defaulted(explanation: &str, fallback: &str) -> String {
    if explanation.trim().is_empty() {
        fallback.to_string()
    } else {
        explanation.to_string()
    }
}

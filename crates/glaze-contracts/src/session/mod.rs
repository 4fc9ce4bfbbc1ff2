mod history;
mod transcript;

pub use history::{ImageVersion, VersionHistory};
pub use transcript::{ChatMessage, Sender, Transcript};

pub(crate) fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

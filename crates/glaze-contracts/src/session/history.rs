use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_utc_iso;

/// One committed image artifact plus its provenance.
///
/// Immutable once created. `prompt` is `None` exactly for an originally
/// uploaded image; every derived entry carries the prompt that produced it
/// and/or a `feedback` note describing the transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageVersion {
    pub id: String,
    pub url: String,
    pub timestamp: String,
    pub prompt: Option<String>,
    pub feedback: Option<String>,
}

impl ImageVersion {
    pub fn original(url: impl Into<String>) -> Self {
        Self::annotated(url, None, None)
    }

    pub fn edited(url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::annotated(url, Some(prompt.into()), None)
    }

    pub fn annotated(
        url: impl Into<String>,
        prompt: Option<String>,
        feedback: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            timestamp: now_utc_iso(),
            prompt,
            feedback,
        }
    }

    pub fn is_original(&self) -> bool {
        self.prompt.is_none() && self.feedback.is_none()
    }
}

/// Append-only sequence of image versions plus the cursor marking which
/// version the session is looking at. Entries are never reordered,
/// truncated, or edited in place; the cursor is `None` only in the
/// pristine pre-upload state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionHistory {
    versions: Vec<ImageVersion>,
    current_index: Option<usize>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn versions(&self) -> &[ImageVersion] {
        self.versions.as_slice()
    }

    pub fn get(&self, index: usize) -> Option<&ImageVersion> {
        self.versions.get(index)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current(&self) -> Option<&ImageVersion> {
        self.versions.get(self.current_index?)
    }

    /// Appends a version and moves the cursor onto it.
    pub fn push_current(&mut self, version: ImageVersion) -> &ImageVersion {
        self.versions.push(version);
        let index = self.versions.len() - 1;
        self.current_index = Some(index);
        &self.versions[index]
    }

    /// Moves the cursor one step back. Returns false at the lower boundary
    /// or in the pristine state.
    pub fn view_previous(&mut self) -> bool {
        match self.current_index {
            Some(index) if index > 0 => {
                self.current_index = Some(index - 1);
                true
            }
            _ => false,
        }
    }

    /// Moves the cursor one step forward. Returns false at the newest entry
    /// or in the pristine state.
    pub fn view_next(&mut self) -> bool {
        match self.current_index {
            Some(index) if index + 1 < self.versions.len() => {
                self.current_index = Some(index + 1);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageVersion, VersionHistory};

    #[test]
    fn pristine_history_has_no_cursor() {
        let mut history = VersionHistory::new();
        assert!(history.is_empty());
        assert_eq!(history.current_index(), None);
        assert!(history.current().is_none());
        assert!(!history.view_previous());
        assert!(!history.view_next());
    }

    #[test]
    fn push_current_appends_and_points_at_the_new_entry() {
        let mut history = VersionHistory::new();
        history.push_current(ImageVersion::original("data:image/png;base64,AA=="));
        history.push_current(ImageVersion::edited("/tmp/a.png", "make it a painting"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.current_index(), Some(1));
        assert_eq!(
            history.current().and_then(|version| version.prompt.as_deref()),
            Some("make it a painting")
        );
        assert!(history.get(0).is_some_and(ImageVersion::is_original));
    }

    #[test]
    fn navigation_is_clamped_at_both_boundaries() {
        let mut history = VersionHistory::new();
        history.push_current(ImageVersion::original("a"));
        history.push_current(ImageVersion::edited("b", "p"));

        assert!(!history.view_next());
        assert_eq!(history.current_index(), Some(1));

        assert!(history.view_previous());
        assert_eq!(history.current_index(), Some(0));
        assert!(!history.view_previous());
        assert_eq!(history.current_index(), Some(0));

        assert!(history.view_next());
        assert_eq!(history.current_index(), Some(1));
    }

    #[test]
    fn versions_are_never_reordered_by_navigation() {
        let mut history = VersionHistory::new();
        history.push_current(ImageVersion::original("a"));
        history.push_current(ImageVersion::edited("b", "p1"));
        history.push_current(ImageVersion::edited("c", "p2"));
        history.view_previous();
        history.view_previous();

        let urls: Vec<&str> = history
            .versions()
            .iter()
            .map(|version| version.url.as_str())
            .collect();
        assert_eq!(urls, vec!["a", "b", "c"]);
    }
}

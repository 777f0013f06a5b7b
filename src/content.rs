use crate::error::{PreviewError, PreviewResult};

/// Everything the preview pipeline needs to know about a carousel draft.
///
/// This is deliberately thinner than the wizard's form state: only the
/// fields that influence what ends up on screen (and therefore in the
/// fingerprint) are carried.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SequenceContent {
    pub name: String,
    pub cards: Vec<CardContent>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CardContent {
    pub title: String,
    pub body: String,
    pub media: Option<MediaRef>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
    /// Free-form renderer parameters (crop, focal point, ...). Hashed
    /// canonically, never interpreted here.
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

impl SequenceContent {
    pub fn validate(&self) -> PreviewResult<()> {
        if self.name.trim().is_empty() {
            return Err(PreviewError::validation("sequence name must be non-empty"));
        }
        if self.cards.is_empty() {
            return Err(PreviewError::validation(
                "sequence must contain at least one card",
            ));
        }
        Ok(())
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }
}

// Presence Records
//
// A presence record is a small immutable fact about what a user is doing.
// Adapters construct records through the incremental builder and never
// mutate them afterwards.

use serde::{Deserialize, Serialize};

/// Decorative gradient opt-in carried by a presence record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientFlag {
    #[serde(default)]
    pub enabled: bool,

    /// Selection priority among gradient-enabled records; higher wins.
    #[serde(default)]
    pub priority: i32,
}

/// A single what-a-user-is-doing fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Opaque identity used for de-duplication across sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub small_texts: Vec<String>,

    /// Image URL used for display and palette extraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Start timestamp in unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,

    /// Stop timestamp in unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<i64>,

    #[serde(default)]
    pub paused: bool,

    #[serde(default)]
    pub gradient: GradientFlag,
}

pub type PresenceList = Vec<PresenceRecord>;

/// Incremental builder for [`PresenceRecord`].
#[derive(Debug, Default)]
pub struct PresenceBuilder {
    record: PresenceRecord,
}

impl PresenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.record.id = Some(id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.record.title = Some(title.into());
        self
    }

    pub fn large_text(mut self, text: impl Into<String>) -> Self {
        self.record.large_text = Some(text.into());
        self
    }

    pub fn small_text(mut self, text: impl Into<String>) -> Self {
        self.record.small_texts.push(text.into());
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.record.image = Some(url.into());
        self
    }

    pub fn start(mut self, millis: i64) -> Self {
        self.record.start = Some(millis);
        self
    }

    pub fn stop(mut self, millis: i64) -> Self {
        self.record.stop = Some(millis);
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.record.paused = paused;
        self
    }

    pub fn gradient(mut self, priority: i32) -> Self {
        self.record.gradient = GradientFlag {
            enabled: true,
            priority,
        };
        self
    }

    pub fn build(self) -> PresenceRecord {
        self.record
    }
}

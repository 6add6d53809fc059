//! Profile signals and the canonical text they compose into
//!
//! The canonical text is the single input to both the fingerprint and the
//! embedding service, so composition must be byte-stable for equal input.

use std::collections::HashSet;

/// Maximum number of tags rendered into the canonical text
pub const MAX_TAGS: usize = 10;

/// Raw per-subject signals, assembled fresh for each embedding request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSignal {
    pub selected_tags: Vec<String>,
    pub description: Option<String>,
    pub image_captions: Vec<String>,
    /// Tags inferred from photos; merged after the selected tags
    pub inferred_tags: Vec<String>,
}

impl ProfileSignal {
    pub fn new(
        selected_tags: Vec<String>,
        description: Option<String>,
        image_captions: Vec<String>,
    ) -> Self {
        Self {
            selected_tags,
            description,
            image_captions,
            inferred_tags: Vec::new(),
        }
    }

    pub fn with_inferred_tags(mut self, tags: Vec<String>) -> Self {
        self.inferred_tags = tags;
        self
    }

    /// Tags that will be rendered: selected first, then inferred, capped at [`MAX_TAGS`]
    pub fn merged_tags(&self) -> Vec<String> {
        let mut tags = normalize_items(
            self.selected_tags
                .iter()
                .chain(self.inferred_tags.iter())
                .map(String::as_str),
        );
        tags.truncate(MAX_TAGS);
        tags
    }
}

/// Compose the labelled three-section text for a signal
pub fn compose(signal: &ProfileSignal) -> String {
    let tags = signal.merged_tags().join(", ");
    let description = signal.description.as_deref().unwrap_or("").trim();
    let captions = normalize_items(signal.image_captions.iter().map(String::as_str)).join("\n");

    format!(
        "[SelectedTags]\n{}\n[UserDescription]\n{}\n[ImageCaptions]\n{}\n",
        tags, description, captions
    )
}

/// Trim, drop empties and drop exact duplicates, keeping first-seen order
pub fn normalize_items<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for item in items {
        let value = item.trim();
        if value.is_empty() || !seen.insert(value) {
            continue;
        }
        normalized.push(value.to_string());
    }
    normalized
}

/// Caption string fed to the composer once interest tags are known
pub fn annotate_caption(caption: &str, inferred_tags: &[String]) -> String {
    if inferred_tags.is_empty() {
        caption.to_string()
    } else {
        format!("{} | inferred: {}", caption, inferred_tags.join(", "))
    }
}

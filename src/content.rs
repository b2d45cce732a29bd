//! Collection and item model shared by every provider
//!
//! A series is a [`Collection`] of chapter [`Item`]s. A single transfer (a torrent) is a
//! collection holding exactly one synthetic item that stands for the whole payload, so
//! sessions and the pipeline run the same code for both.

use crate::tags::TagRecord;
use serde::{Deserialize, Serialize};

/// Id of the synthetic item of a single transfer
pub const SINGLE_TRANSFER_ITEM_ID: &str = "payload";

/// One fetchable sub-unit of a collection
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Identifier within the provider
    pub id: String,
    /// Volume label ("2", "10.5")
    #[serde(default)]
    pub volume: Option<String>,
    /// Item number label ("12", "12.5", "extra-a")
    #[serde(default)]
    pub number: Option<String>,
    /// Item title
    #[serde(default)]
    pub title: Option<String>,
    /// Tags written into the item's metadata
    #[serde(default)]
    pub tags: Vec<TagRecord>,
    /// Scanlation group / translator
    #[serde(default)]
    pub group: Option<String>,
}

impl Item {
    /// Item with only an id and a number
    pub fn numbered(id: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            number: Some(number.into()),
            ..Self::default()
        }
    }

    /// Set the volume
    pub fn in_volume(mut self, volume: impl Into<String>) -> Self {
        self.volume = Some(volume.into());
        self
    }

    /// Volume label, None when empty
    pub fn volume(&self) -> Option<&str> {
        self.volume.as_deref().filter(|v| !v.is_empty())
    }

    /// Number label, None when empty
    pub fn number(&self) -> Option<&str> {
        self.number.as_deref().filter(|n| !n.is_empty())
    }

    /// Items without a number are one-shots (extras, specials)
    pub fn is_one_shot(&self) -> bool {
        self.number().is_none()
    }

    /// Short human label ("Vol. 2 Ch. 5", "Ch. 5", "One Shot")
    pub fn label(&self) -> String {
        match (self.volume(), self.number()) {
            (Some(v), Some(n)) => format!("Vol. {v} Ch. {n}"),
            (None, Some(n)) => format!("Ch. {n}"),
            (Some(v), None) => format!("Vol. {v}"),
            (None, None) => "One Shot".to_string(),
        }
    }
}

/// Structural shape of a collection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentShape {
    /// Multi-item collection, progress counted in items and parts
    Chapters,
    /// One byte-stream payload, progress counted in bytes
    SingleTransfer {
        /// Total payload size
        total_bytes: u64,
    },
}

/// Top-level downloadable grouping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Identifier within the provider
    pub id: String,
    /// Title used for directory names
    pub title: String,
    /// Items in source order
    pub items: Vec<Item>,
    /// Shape of the collection
    pub shape: ContentShape,
    /// Cover image location
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl Collection {
    /// Multi-item collection
    pub fn chapters(id: impl Into<String>, title: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            items,
            shape: ContentShape::Chapters,
            cover_url: None,
        }
    }

    /// Single transfer with its one synthetic item
    pub fn single_transfer(id: impl Into<String>, title: impl Into<String>, total_bytes: u64) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            items: vec![Item {
                id: SINGLE_TRANSFER_ITEM_ID.to_string(),
                title: Some(title.clone()),
                ..Item::default()
            }],
            title,
            shape: ContentShape::SingleTransfer { total_bytes },
            cover_url: None,
        }
    }

    /// Whether this is a single transfer
    pub fn is_single_transfer(&self) -> bool {
        matches!(self.shape, ContentShape::SingleTransfer { .. })
    }

    /// Human readable size for `wanted` items
    pub fn size_label(&self, wanted: usize) -> String {
        match self.shape {
            ContentShape::Chapters => format!("{wanted} Chapters"),
            ContentShape::SingleTransfer { total_bytes } => format_bytes(total_bytes),
        }
    }
}

/// Format a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

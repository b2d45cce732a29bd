//! On-disk naming convention
//!
//! ```text
//! <base>/<title>/                              collection directory
//! <base>/<title>/<title> Vol. 2/               volume directory
//! <base>/<title>/<title> Vol. 2/<title> Ch. 0005/   item directory (or .cbz)
//! <base>/<title>/<title> Extra Story (One Shot)/    item without a number
//! ```
//!
//! Items get the volume in their own name only when the collection reuses item numbers
//! across volumes.

use crate::content::Item;
use crate::error::{Error, Result};
use crate::utils::{extension_from_url, file_name_from_url, pad_label, sanitize_file_name};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Width item numbers are padded to
const NUMBER_WIDTH: usize = 4;

/// Width part indices are padded to
const PART_WIDTH: usize = 4;

/// Default pattern for recognizing content names (extension already stripped)
pub const DEFAULT_CONTENT_PATTERN: &str =
    r"^(?P<title>.+?)(?: Vol\. (?P<volume>[\d.]+))?(?: Ch\. (?P<number>\S+))?(?P<oneshot> \(One Shot\))?$";

/// Volume and number extracted from a file or directory name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedName {
    /// Volume label
    pub volume: Option<String>,
    /// Item number label
    pub number: Option<String>,
    /// Name marks an item without a number
    pub one_shot: bool,
}

impl ParsedName {
    /// Names with only a volume are volume directories or whole-volume archives
    pub fn is_volume_only(&self) -> bool {
        self.volume.is_some() && self.number.is_none() && !self.one_shot
    }

    /// Names that stand for a single item
    pub fn is_item(&self) -> bool {
        self.number.is_some() || self.one_shot
    }
}

/// Provider naming convention for directories, archives and part files
#[derive(Clone, Debug)]
pub struct NamingConvention {
    pattern: Regex,
}

impl Default for NamingConvention {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        let pattern = Regex::new(DEFAULT_CONTENT_PATTERN).expect("default content pattern is valid");
        Self { pattern }
    }
}

impl NamingConvention {
    /// Convention recognizing names with a custom pattern
    ///
    /// The pattern may define `volume`, `number` and `oneshot` named groups.
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| Error::Config {
            message: format!("invalid content_pattern: {e}"),
            key: Some("content_pattern".to_string()),
        })?;
        Ok(Self { pattern })
    }

    /// Directory a collection is written to
    pub fn collection_dir(&self, base: &Path, title: &str) -> PathBuf {
        let title = sanitize_file_name(title);
        if title.is_empty() {
            return base.to_path_buf();
        }
        base.join(title)
    }

    /// Name of a volume directory and of a whole-volume archive (without extension)
    pub fn volume_name(&self, title: &str, volume: &str) -> String {
        sanitize_file_name(&format!("{title} Vol. {volume}"))
    }

    /// Name of an item directory / archive (without extension)
    pub fn item_name(&self, title: &str, item: &Item, include_volume: bool) -> String {
        let name = match item.number() {
            Some(number) => {
                let mut name = title.to_string();
                if include_volume && let Some(volume) = item.volume() {
                    name.push_str(&format!(" Vol. {volume}"));
                }
                format!("{name} Ch. {}", pad_label(number, NUMBER_WIDTH))
            }
            None => {
                let label = item.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(&item.id);
                format!("{title} {label} (One Shot)")
            }
        };
        sanitize_file_name(&name)
    }

    /// Directory an item's parts are written to
    pub fn item_dir(&self, collection_dir: &Path, title: &str, item: &Item, include_volume: bool) -> PathBuf {
        let mut dir = collection_dir.to_path_buf();
        if let Some(volume) = item.volume() {
            dir.push(self.volume_name(title, volume));
        }
        dir.push(self.item_name(title, item, include_volume));
        dir
    }

    /// Extract volume and number from a name without extension
    ///
    /// Returns None for names that are not content.
    pub fn parse(&self, name: &str) -> Option<ParsedName> {
        let captures = self.pattern.captures(name)?;
        let group = |name: &str| {
            captures
                .name(name)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        };
        let parsed = ParsedName {
            volume: group("volume"),
            number: group("number"),
            one_shot: captures.name("oneshot").is_some(),
        };
        if parsed.volume.is_none() && !parsed.is_item() {
            return None;
        }
        Some(parsed)
    }

    /// File name for the 1-based part `index` fetched from `url`
    pub fn part_file_name(&self, index: usize, url: &str) -> String {
        format!("page {}{}", pad_label(&index.to_string(), PART_WIDTH), extension_from_url(url))
    }

    /// Cover file name; the prefix sorts it before every page
    pub fn cover_file_name(&self, url: &str) -> String {
        format!("!0000 cover{}", extension_from_url(url))
    }

    /// File name for a part of a single transfer, taken from its location
    pub fn transfer_file_name(&self, index: usize, url: &str) -> String {
        file_name_from_url(url)
            .map(|name| sanitize_file_name(&name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("part {}", pad_label(&index.to_string(), PART_WIDTH)))
    }
}

/// Whether any item number occurs in more than one volume
pub fn has_duplicate_numbers(items: &[Item]) -> bool {
    let mut seen: Vec<(&str, Option<&str>)> = Vec::new();
    for item in items {
        let Some(number) = item.number() else { continue };
        let volume = item.volume();
        if seen
            .iter()
            .any(|(n, v)| crate::utils::same_label(n, number) && *v != volume)
        {
            return true;
        }
        seen.push((number, volume));
    }
    false
}

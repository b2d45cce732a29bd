//! Comic archive helpers
//!
//! - [`ComicInfo`]: the metadata document written next to the parts of an item
//! - [`VolumeInspector`] / [`ComicInfoInspector`]: read the volume an item on disk was
//!   filed under from its embedded metadata
//! - [`Packager`] / [`CbzPackager`]: turn a finished item directory into a `.cbz`

use crate::error::{Error, Result};
use crate::tags::AgeRating;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the embedded metadata document
pub const COMIC_INFO_FILE: &str = "ComicInfo.xml";

/// Archive extension
pub const CBZ_EXTENSION: &str = "cbz";

/// Subset of the ComicInfo schema this crate writes and reads
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComicInfo {
    /// Series title
    pub series: String,
    /// Item title
    pub title: Option<String>,
    /// Item number
    pub number: Option<String>,
    /// Volume
    pub volume: Option<String>,
    /// Comma-joined genres
    pub genre: String,
    /// Comma-joined tags
    pub tags: String,
    /// Age rating
    pub age_rating: Option<AgeRating>,
    /// Source page
    pub web: Option<String>,
    /// Scanlation group / translator
    pub translator: Option<String>,
}

/// Document layout of `ComicInfo.xml`, empty fields omitted
#[derive(Serialize)]
#[serde(rename = "ComicInfo")]
struct ComicInfoDocument<'a> {
    #[serde(rename = "@xmlns:xsi")]
    xsi: &'static str,
    #[serde(rename = "Series", skip_serializing_if = "Option::is_none")]
    series: Option<&'a str>,
    #[serde(rename = "Title", skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(rename = "Number", skip_serializing_if = "Option::is_none")]
    number: Option<&'a str>,
    #[serde(rename = "Volume", skip_serializing_if = "Option::is_none")]
    volume: Option<&'a str>,
    #[serde(rename = "Genre", skip_serializing_if = "Option::is_none")]
    genre: Option<&'a str>,
    #[serde(rename = "Tags", skip_serializing_if = "Option::is_none")]
    tags: Option<&'a str>,
    #[serde(rename = "AgeRating", skip_serializing_if = "Option::is_none")]
    age_rating: Option<&'static str>,
    #[serde(rename = "Web", skip_serializing_if = "Option::is_none")]
    web: Option<&'a str>,
    #[serde(rename = "Translator", skip_serializing_if = "Option::is_none")]
    translator: Option<&'a str>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// The parts of a ComicInfo document read back from disk
#[derive(Deserialize)]
struct VolumeOnly {
    #[serde(rename = "Volume", default)]
    volume: Option<TextElement>,
}

/// Element whose attributes are ignored
#[derive(Deserialize)]
struct TextElement {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

impl ComicInfo {
    /// Serialize to XML
    pub fn to_xml(&self) -> Result<String> {
        let document = ComicInfoDocument {
            xsi: "http://www.w3.org/2001/XMLSchema-instance",
            series: non_empty(Some(self.series.as_str())),
            title: non_empty(self.title.as_deref()),
            number: non_empty(self.number.as_deref()),
            volume: non_empty(self.volume.as_deref()),
            genre: non_empty(Some(self.genre.as_str())),
            tags: non_empty(Some(self.tags.as_str())),
            age_rating: self.age_rating.as_ref().map(AgeRating::as_str),
            web: non_empty(self.web.as_deref()),
            translator: non_empty(self.translator.as_deref()),
        };
        let body = quick_xml::se::to_string(&document)
            .map_err(|e| Error::Archive(format!("failed to serialize {COMIC_INFO_FILE}: {e}")))?;
        Ok(format!("{XML_DECLARATION}{body}\n"))
    }

    /// Write `ComicInfo.xml` into `dir`
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(COMIC_INFO_FILE), self.to_xml()?)?;
        Ok(())
    }
}

/// Volume recorded in a ComicInfo document
///
/// `Ok(None)` when the element is absent, empty or unset (-1). A document that does not
/// parse is an error, so callers can tell it apart from a missing volume.
pub fn volume_from_xml(xml: &str) -> Result<Option<String>> {
    let document: VolumeOnly = quick_xml::de::from_str(xml)
        .map_err(|e| Error::Archive(format!("invalid {COMIC_INFO_FILE}: {e}")))?;
    Ok(document
        .volume
        .and_then(|element| element.value)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && value != "-1"))
}

/// Reads the volume an on-disk item was filed under
pub trait VolumeInspector: Send + Sync {
    /// `Ok(None)` means the metadata was read and carries no volume; `Err` means the
    /// metadata could not be read at all.
    fn volume_of(&self, path: &Path) -> Result<Option<String>>;
}

/// Inspector reading `ComicInfo.xml` from `.cbz` archives or item directories
#[derive(Clone, Copy, Debug, Default)]
pub struct ComicInfoInspector;

impl ComicInfoInspector {
    fn read_from_archive(path: &Path) -> Result<String> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| Error::Archive(format!("failed to open {}: {}", path.display(), e)))?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| Error::Archive(format!("failed to read entry: {}", e)))?;
            let is_comic_info = Path::new(entry.name())
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.eq_ignore_ascii_case(COMIC_INFO_FILE));
            if is_comic_info {
                let mut xml = String::new();
                entry.read_to_string(&mut xml)?;
                return Ok(xml);
            }
        }

        Err(Error::Archive(format!(
            "no {} in {}",
            COMIC_INFO_FILE,
            path.display()
        )))
    }
}

impl VolumeInspector for ComicInfoInspector {
    fn volume_of(&self, path: &Path) -> Result<Option<String>> {
        let xml = if path.is_dir() {
            std::fs::read_to_string(path.join(COMIC_INFO_FILE))?
        } else {
            Self::read_from_archive(path)?
        };
        volume_from_xml(&xml)
    }
}

/// Packages a finished item directory
pub trait Packager: Send + Sync {
    /// Package `dir`, returning the path of the created archive
    ///
    /// The directory itself is left in place.
    fn package(&self, dir: &Path) -> Result<PathBuf>;
}

/// Stores every file of a directory in a `<dir>.cbz` next to it
#[derive(Clone, Copy, Debug, Default)]
pub struct CbzPackager;

/// `<dir>.cbz` without touching dots inside the directory name
pub fn archive_path_for(dir: &Path) -> PathBuf {
    let mut name = dir.as_os_str().to_owned();
    name.push(".");
    name.push(CBZ_EXTENSION);
    PathBuf::from(name)
}

impl Packager for CbzPackager {
    fn package(&self, dir: &Path) -> Result<PathBuf> {
        let target = archive_path_for(dir);
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        let out = std::fs::File::create(&target)?;
        let mut writer = zip::ZipWriter::new(out);
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);

        for file in &files {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            writer
                .start_file(name, options)
                .map_err(|e| Error::Archive(format!("failed to add {}: {}", name, e)))?;
            writer.write_all(&std::fs::read(file)?)?;
        }

        writer
            .finish()
            .map_err(|e| Error::Archive(format!("failed to finish {}: {}", target.display(), e)))?;

        debug!(archive = %target.display(), files = files.len(), "packaged item");
        Ok(target)
    }
}

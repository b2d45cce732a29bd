//! Disk reconciliation
//!
//! Before a collection is downloaded its directory is scanned for items that are already
//! present, so only the missing subset is fetched. The scan only reads the filesystem,
//! so planning twice without downloading in between yields the same plan.
//!
//! Items are matched by number. An item that is on disk as a loose item (no volume in its
//! name or location) while the source now files it under a volume is checked against the
//! volume in its embedded metadata; when that disagrees the on-disk copy is scheduled for
//! removal and the item is downloaded again. Unreadable metadata is logged and the copy
//! is kept.
//!
//! Only `.cbz` archives count as finished content by default. Plain item directories
//! count too when the caller enables [`DiskReconciler::with_item_directories`], which is
//! the case when finished items are not packaged.

pub mod naming;


pub use naming::{NamingConvention, ParsedName, has_duplicate_numbers};

use crate::archive::{CBZ_EXTENSION, VolumeInspector};
use crate::content::{Collection, Item};
use crate::error::Result;
use crate::types::DownloadOptions;
use crate::utils::{label_key, same_label};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// A content file or directory found on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnDiskItem {
    /// File or directory name
    pub name: String,
    /// Name without the archive extension
    pub stem: String,
    /// Full path
    pub path: PathBuf,
    /// Volume from the name or the enclosing volume directory
    pub volume: Option<String>,
    /// Item number from the name
    pub number: Option<String>,
    /// Item without a number
    pub one_shot: bool,
    /// `.cbz` archive rather than a directory
    pub is_archive: bool,
}

/// Result of reconciling a collection against the disk
#[derive(Clone, Debug, Default)]
pub struct ReconcilePlan {
    /// Items that have to be downloaded, in source order
    pub to_download: Vec<Item>,
    /// On-disk copies that are replaced by a download
    pub to_remove: Vec<PathBuf>,
    /// Everything recognized on disk
    pub on_disk: Vec<OnDiskItem>,
    /// Time spent scanning and matching
    pub elapsed: Duration,
    /// Whether `elapsed` exceeded the long-scan threshold
    pub slow: bool,
}

impl ReconcilePlan {
    /// Nothing new to fetch
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty()
    }
}

/// Scans collection directories and filters wanted items
#[derive(Clone)]
pub struct DiskReconciler {
    naming: NamingConvention,
    inspector: Arc<dyn VolumeInspector>,
    long_scan_threshold: Duration,
    item_directories: bool,
}

impl std::fmt::Debug for DiskReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskReconciler")
            .field("naming", &self.naming)
            .field("long_scan_threshold", &self.long_scan_threshold)
            .field("item_directories", &self.item_directories)
            .finish_non_exhaustive()
    }
}

impl DiskReconciler {
    /// Create a reconciler recognizing archives only
    pub fn new(
        naming: NamingConvention,
        inspector: Arc<dyn VolumeInspector>,
        long_scan_threshold: Duration,
    ) -> Self {
        Self {
            naming,
            inspector,
            long_scan_threshold,
            item_directories: false,
        }
    }

    /// Also count unpackaged item directories as content on disk
    pub fn with_item_directories(mut self, enabled: bool) -> Self {
        self.item_directories = enabled;
        self
    }

    /// Naming convention used for matching
    pub fn naming(&self) -> &NamingConvention {
        &self.naming
    }

    /// Recursively list recognized content under `dir`
    ///
    /// A missing directory is a fresh download and yields an empty list. Item directories
    /// are not descended into; volume and unrelated directories are. Item directories are
    /// only listed when enabled, otherwise they are leftovers of an unfinished download.
    pub fn scan(&self, dir: &Path) -> Result<Vec<OnDiskItem>> {
        if !dir.exists() {
            trace!(dir = %dir.display(), "directory not found, fresh download");
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let mut walker = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_dir = entry.file_type().is_dir();

            let stem = if is_dir {
                name.clone()
            } else {
                match Path::new(&name).extension().and_then(|e| e.to_str()) {
                    Some(ext) if ext.eq_ignore_ascii_case(CBZ_EXTENSION) => {
                        name[..name.len() - ext.len() - 1].to_string()
                    }
                    _ => {
                        trace!(file = %name, "skipping non content file");
                        continue;
                    }
                }
            };

            let Some(parsed) = self.naming.parse(&stem) else {
                trace!(file = %name, "skipping non content file");
                continue;
            };

            // Volume directories are containers, not content
            if is_dir && !parsed.is_item() {
                continue;
            }
            if is_dir {
                walker.skip_current_dir();
                if !self.item_directories {
                    trace!(dir = %name, "skipping unpackaged item directory");
                    continue;
                }
            }

            let volume = parsed.volume.or_else(|| self.parent_volume(entry.path()));
            trace!(file = %name, ?volume, number = ?parsed.number, "found content on disk");
            found.push(OnDiskItem {
                name,
                stem,
                path: entry.into_path(),
                volume,
                number: parsed.number,
                one_shot: parsed.one_shot,
                is_archive: !is_dir,
            });
        }

        Ok(found)
    }

    fn parent_volume(&self, path: &Path) -> Option<String> {
        let parent = path.parent()?.file_name()?.to_str()?;
        self.naming
            .parse(parent)
            .filter(ParsedName::is_volume_only)
            .and_then(|p| p.volume)
    }

    /// Decide whether `item` has to be downloaded
    ///
    /// On-disk copies that must be replaced are appended to `to_remove`.
    pub fn should_download(
        &self,
        title: &str,
        item: &Item,
        on_disk: &[OnDiskItem],
        include_volume: bool,
        to_remove: &mut Vec<PathBuf>,
    ) -> bool {
        // Whole volume archives from older layouts satisfy every item of the volume
        if let Some(volume) = item.volume() {
            let whole = self.naming.volume_name(title, volume);
            if on_disk.iter().any(|d| d.is_archive && d.stem == whole) {
                return false;
            }
        }

        let Some(number) = item.number() else {
            let expected = self.naming.item_name(title, item, include_volume);
            return !on_disk.iter().any(|d| d.one_shot && d.stem == expected);
        };

        let candidates: Vec<&OnDiskItem> = on_disk
            .iter()
            .filter(|d| d.number.as_deref().is_some_and(|n| same_label(n, number)))
            .collect();
        if candidates.is_empty() {
            return true;
        }

        let Some(volume) = item.volume() else {
            return false;
        };

        if candidates
            .iter()
            .any(|d| d.volume.as_deref().is_some_and(|v| same_label(v, volume)))
        {
            return false;
        }

        let loose: Vec<&&OnDiskItem> = candidates.iter().filter(|d| d.volume.is_none()).collect();
        if loose.is_empty() {
            // Same number, other volumes only
            return true;
        }

        let mut replace = Vec::new();
        for copy in loose {
            match self.inspector.volume_of(&copy.path) {
                Ok(Some(on_disk_volume)) if same_label(&on_disk_volume, volume) => {
                    trace!(path = %copy.path.display(), "volume on disk matches, not replacing");
                    return false;
                }
                Ok(on_disk_volume) => {
                    debug!(
                        path = %copy.path.display(),
                        on_disk_volume = ?on_disk_volume,
                        volume,
                        "loose item has been assigned to a volume, replacing"
                    );
                    replace.push(copy.path.clone());
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %copy.path.display(),
                        item_id = %item.id,
                        "unable to read embedded metadata, keeping item on disk"
                    );
                    return false;
                }
            }
        }

        to_remove.extend(replace);
        true
    }

    /// Compute what has to be downloaded for `collection` into `collection_dir`
    pub fn plan(
        &self,
        collection_dir: &Path,
        collection: &Collection,
        options: &DownloadOptions,
    ) -> ReconcilePlan {
        let start = Instant::now();
        let wanted = wanted_items(collection, options);

        if collection.is_single_transfer() {
            return ReconcilePlan {
                to_download: wanted,
                elapsed: start.elapsed(),
                ..ReconcilePlan::default()
            };
        }

        debug!(dir = %collection_dir.display(), "checking content on disk");
        let on_disk = match self.scan(collection_dir) {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    error = %e,
                    dir = %collection_dir.display(),
                    "unable to check for already downloaded content, downloading all"
                );
                Vec::new()
            }
        };

        let include_volume = has_duplicate_numbers(&collection.items);
        let mut to_remove = Vec::new();
        let to_download: Vec<Item> = wanted
            .into_iter()
            .filter(|item| {
                self.should_download(
                    &collection.title,
                    item,
                    &on_disk,
                    include_volume,
                    &mut to_remove,
                )
            })
            .collect();

        let elapsed = start.elapsed();
        let slow = elapsed > self.long_scan_threshold;
        if slow {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                dir = %collection_dir.display(),
                "checking which content must be downloaded took a long time"
            );
        }

        ReconcilePlan {
            to_download,
            to_remove,
            on_disk,
            elapsed,
            slow,
        }
    }
}

/// Items the request wants at all, before looking at the disk
///
/// Drops one-shots unless requested and releases of other groups when a group filter
/// is set.
pub fn wanted_items(collection: &Collection, options: &DownloadOptions) -> Vec<Item> {
    if collection.is_single_transfer() {
        return collection.items.clone();
    }

    collection
        .items
        .iter()
        .filter(|item| options.download_one_shot || !item.is_one_shot())
        .filter(|item| match (&options.scanlation_group, &item.group) {
            (Some(wanted), Some(group)) => wanted.eq_ignore_ascii_case(group),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .cloned()
        .collect()
}

/// Give items without a volume the volume of the closest lower-numbered item
///
/// Items before the first volume keep no volume.
pub fn fill_empty_volumes(items: &mut [Item]) {
    let mut order: Vec<usize> = (0..items.len()).filter(|&i| items[i].number().is_some()).collect();
    order.sort_by(|&a, &b| {
        label_key(items[a].number())
            .partial_cmp(&label_key(items[b].number()))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut current: Option<String> = None;
    for index in order {
        match items[index].volume() {
            Some(volume) => current = Some(volume.to_string()),
            None => items[index].volume = current.clone(),
        }
    }
}

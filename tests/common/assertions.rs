//! Event helpers and filesystem assertions

use content_dl::{ContentKey, ContentState, Event, Notification};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Collect events until `key` has been removed
pub async fn collect_until_removed(
    rx: &mut broadcast::Receiver<Event>,
    key: &ContentKey,
    timeout: Duration,
) -> Vec<Event> {
    let mut events = Vec::new();
    let result = tokio::time::timeout(timeout, async {
        while let Ok(event) = rx.recv().await {
            let done = matches!(&event, Event::Removed { key: k } if k == key);
            events.push(event);
            if done {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "{key} was not removed within {timeout:?}");
    events
}

/// States `key` went through, in order
pub fn states_of(events: &[Event], key: &ContentKey) -> Vec<ContentState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StateChanged { key: k, state } if k == key => Some(*state),
            _ => None,
        })
        .collect()
}

/// Notifications among `events`
pub fn notifications(events: &[Event]) -> Vec<Notification> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Notification(n) => Some(n.clone()),
            _ => None,
        })
        .collect()
}

/// Read one entry of a zip archive as text
pub fn read_archive_entry(archive: &Path, name: &str) -> String {
    let file = std::fs::File::open(archive)
        .unwrap_or_else(|e| panic!("cannot open {}: {e}", archive.display()));
    let mut zip = zip::ZipArchive::new(file).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    text
}

/// Names of the entries of a zip archive
pub fn archive_entries(archive: &Path) -> Vec<String> {
    let file = std::fs::File::open(archive).unwrap();
    let zip = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    names
}

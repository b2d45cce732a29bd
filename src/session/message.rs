//! Control messages: content plan listing and user selection

use super::ContentSession;
use crate::content::Item;
use crate::error::SessionError;
use crate::types::{ContentListNode, ContentState};
use crate::utils::label_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message sent to a session through the downloader
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    /// List the loaded items grouped by volume
    ListContent,
    /// Restrict the download to these item ids (Waiting or Ready only)
    SetSelection(Vec<String>),
    /// Confirm the download (Waiting only)
    StartDownload,
}

/// Reply to a [`Message`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageReply {
    /// Content plan
    Content(Vec<ContentListNode>),
    /// The message was applied
    Accepted,
}

impl ContentSession {
    /// Content plan: volumes ascending, items by number descending
    ///
    /// Items without a volume are listed at the top level when no item has a volume,
    /// and under "No Volume" (sorted last) otherwise.
    pub fn content_list(&self) -> Vec<ContentListNode> {
        let inner = self.inner();
        let Some(collection) = &inner.collection else {
            return Vec::new();
        };

        let will_download = |item: &Item| {
            if inner.user_selected.is_empty() {
                inner.to_download.iter().any(|i| i.id == item.id)
            } else {
                inner.user_selected.contains(&item.id)
            }
        };

        let mut groups: BTreeMap<String, Vec<&Item>> = BTreeMap::new();
        for item in &collection.items {
            groups
                .entry(item.volume().unwrap_or_default().to_string())
                .or_default()
                .push(item);
        }

        let mut volumes: Vec<String> = groups.keys().cloned().collect();
        volumes.sort_by(|a, b| match (a.is_empty(), b.is_empty()) {
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            _ => label_key(Some(a))
                .partial_cmp(&label_key(Some(b)))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b)),
        });

        let children = |items: &[&Item]| -> Vec<ContentListNode> {
            let mut items = items.to_vec();
            items.sort_by(|a, b| {
                label_key(b.number())
                    .partial_cmp(&label_key(a.number()))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            items
                .into_iter()
                .map(|item| ContentListNode {
                    label: format!("{} {}", item.title.as_deref().unwrap_or_default(), item.label())
                        .trim()
                        .to_string(),
                    id: Some(item.id.clone()),
                    selected: will_download(item),
                    children: Vec::new(),
                })
                .collect()
        };

        let mut out = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let items = &groups[&volume];
            if volume.is_empty() && groups.len() == 1 {
                out.extend(children(items));
                continue;
            }

            let nodes = children(items);
            out.push(ContentListNode {
                label: if volume.is_empty() {
                    "No Volume".to_string()
                } else {
                    format!("Volume {volume}")
                },
                id: None,
                selected: nodes.iter().any(|n| n.selected),
                children: nodes,
            });
        }
        out
    }

    /// Restrict the download to `ids`; allowed while Waiting or Ready
    pub(crate) fn set_selection(&self, ids: Vec<String>) -> Result<(), SessionError> {
        let size = {
            let mut inner = self.inner();
            if !matches!(inner.state, ContentState::Waiting | ContentState::Ready) {
                return Err(SessionError::InvalidState {
                    key: self.key.clone(),
                    operation: "select".to_string(),
                    current_state: inner.state.to_string(),
                });
            }
            let wanted = if ids.is_empty() {
                inner.to_download.len()
            } else {
                ids.len()
            };
            inner.user_selected = ids;
            inner
                .collection
                .as_ref()
                .map(|c| c.size_label(wanted))
                .unwrap_or_default()
        };
        self.set_size(size);
        Ok(())
    }
}

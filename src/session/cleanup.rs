//! Cleanup phase: keep (and package) or delete the session's output

use super::ContentSession;
use crate::archive::Packager;
use crate::utils::prune_empty_parents;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Collaborators of the cleanup phase
pub(crate) struct CleanupContext {
    pub packager: Arc<dyn Packager>,
    pub packaging: bool,
}

/// What cleanup did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files and directories removed
    pub removed: usize,
    /// Item directories packaged into archives
    pub packaged: usize,
    /// Failures, one line each
    pub errors: Vec<String>,
}

/// Snapshot of the output a session produced
struct Output {
    created: Vec<PathBuf>,
    finished: Vec<PathBuf>,
    replaced: Vec<PathBuf>,
    collection_dir: Option<PathBuf>,
    completed: bool,
    single_transfer: bool,
}

impl ContentSession {
    /// Remove or keep the output of this session
    ///
    /// With `delete` every item directory and transfer file this session created is removed,
    /// followed by the parent directories that became empty. Without it, replaced copies are
    /// removed and new item directories are packaged when the download completed; an
    /// interrupted download only removes the items it did not finish.
    pub(crate) async fn cleanup(&self, delete: bool, ctx: &CleanupContext) -> CleanupReport {
        let output = {
            let inner = self.inner();
            Output {
                created: inner.has_downloaded.clone(),
                finished: inner.finished.clone(),
                replaced: inner.to_remove.clone(),
                collection_dir: inner.collection_dir.clone(),
                completed: inner.completed,
                single_transfer: inner
                    .collection
                    .as_ref()
                    .is_some_and(|c| c.is_single_transfer()),
            }
        };

        tracing::debug!(
            content_id = %self.key.id,
            delete,
            created = output.created.len(),
            "cleaning up"
        );

        let packager = Arc::clone(&ctx.packager);
        let packaging = ctx.packaging && !output.single_transfer;
        let result = tokio::task::spawn_blocking(move || {
            if delete {
                delete_output(&output)
            } else {
                keep_output(&output, packaging.then_some(packager.as_ref()))
            }
        })
        .await;

        let report = result.unwrap_or_else(|e| CleanupReport {
            errors: vec![format!("cleanup task failed: {e}")],
            ..CleanupReport::default()
        });

        for error in &report.errors {
            tracing::error!(content_id = %self.key.id, error = %error, "cleanup error");
        }
        report
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Remove `paths` and prune the directories they leave empty
fn remove_created<'a>(
    paths: impl IntoIterator<Item = &'a PathBuf>,
    collection_dir: Option<&Path>,
    report: &mut CleanupReport,
) {
    for path in paths {
        match remove_path(path) {
            Ok(()) => {
                tracing::trace!(path = %path.display(), "removed partial output");
                report.removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                report
                    .errors
                    .push(format!("failed to remove {}: {e}", path.display()));
                continue;
            }
        }

        if let Some(collection_dir) = collection_dir
            && let Err(e) = prune_empty_parents(path, collection_dir)
        {
            report.errors.push(format!(
                "failed to remove empty directories above {}: {e}",
                path.display()
            ));
        }
    }
}

fn delete_output(output: &Output) -> CleanupReport {
    let mut report = CleanupReport::default();
    remove_created(&output.created, output.collection_dir.as_deref(), &mut report);
    report
}

fn keep_output(output: &Output, packager: Option<&dyn Packager>) -> CleanupReport {
    let mut report = CleanupReport::default();
    if !output.completed {
        let unfinished = output
            .created
            .iter()
            .filter(|path| !output.finished.contains(path));
        remove_created(unfinished, output.collection_dir.as_deref(), &mut report);
        return report;
    }

    for path in &output.replaced {
        match remove_path(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed replaced content");
                report.removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report
                .errors
                .push(format!("failed to remove {}: {e}", path.display())),
        }
    }

    let Some(packager) = packager else {
        return report;
    };

    for dir in &output.created {
        match packager.package(dir) {
            Ok(archive) => {
                tracing::trace!(archive = %archive.display(), "packaged item");
                report.packaged += 1;
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    report
                        .errors
                        .push(format!("failed to remove {} after packaging: {e}", dir.display()));
                }
            }
            Err(e) => report
                .errors
                .push(format!("failed to package {}: {e}", dir.display())),
        }
    }

    report
}

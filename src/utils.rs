//! Utility functions for naming and path manipulation

use std::path::Path;

/// Left-pad the integer part of a numeric label ("12.5" -> "0012.5")
///
/// Labels that are not numbers ("extra-a") are returned unchanged.
///
/// # Examples
///
/// ```
/// use content_dl::utils::pad_label;
///
/// assert_eq!(pad_label("7", 4), "0007");
/// assert_eq!(pad_label("12.5", 4), "0012.5");
/// assert_eq!(pad_label("extra-a", 4), "extra-a");
/// ```
pub fn pad_label(label: &str, width: usize) -> String {
    if label.parse::<f64>().is_err() {
        return label.to_string();
    }
    match label.split_once('.') {
        Some((int, frac)) => format!("{int:0>width$}.{frac}"),
        None => format!("{label:0>width$}"),
    }
}

/// Compare two volume or number labels, numerically when both are numbers
///
/// "05" and "5" are the same volume; "5" and "5.5" are not.
pub fn same_label(a: &str, b: &str) -> bool {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() < f64::EPSILON,
        _ => a.trim().eq_ignore_ascii_case(b.trim()),
    }
}

/// Numeric sort key for a label, non-numbers sort as zero
pub fn label_key(label: Option<&str>) -> f64 {
    label.and_then(|l| l.trim().parse::<f64>().ok()).unwrap_or(0.0)
}

/// Replace characters that are not allowed in file names
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_end_matches('.').to_string()
}

/// Last path segment of a URL, query and fragment stripped
///
/// # Examples
///
/// ```
/// use content_dl::utils::file_name_from_url;
///
/// assert_eq!(
///     file_name_from_url("https://cdn.example/data/abc/x1-page.png?token=1"),
///     Some("x1-page.png".to_string())
/// );
/// assert_eq!(file_name_from_url("https://cdn.example/"), None);
/// ```
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    Some(last.to_string())
}

/// Extension of the file a URL points to, with the leading dot; ".jpg" when unknown
pub fn extension_from_url(url: &str) -> String {
    file_name_from_url(url)
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| ".jpg".to_string())
}

/// Remove the empty ancestors of `path`, innermost first, up to and including `stop_at`
///
/// Stops at the first ancestor that still has entries or lies outside `stop_at`.
/// Returns the number of directories removed.
pub fn prune_empty_parents(path: &Path, stop_at: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut current = path.parent();
    while let Some(dir) = current {
        if !dir.starts_with(stop_at) {
            break;
        }
        if dir.is_dir() {
            if std::fs::read_dir(dir)?.next().is_some() {
                break;
            }
            std::fs::remove_dir(dir)?;
            removed += 1;
        }
        if dir == stop_at {
            break;
        }
        current = dir.parent();
    }
    Ok(removed)
}

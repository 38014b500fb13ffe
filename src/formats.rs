//! Book format detection by file extension.

/// Extensions recognised as books.
const SUPPORTED: &[&str] = &[
    "epub", "pdf", "txt", "mobi", "cbz", "cbr", "cb7", "cbt", "cba", "azw", "azw3", "azw4", "kfx",
    "fb2", "rtf", "docx", "odt", "md", "markdown", "html", "htm", "djvu", "xps", "lit", "pdb",
];

/// Maps a remote path to a book format name.
pub trait FormatDetector: Send + Sync {
    /// Detect the format of `path`, or `None` if it is not a recognised book.
    fn detect(&self, path: &str) -> Option<String>;
}

/// Detector backed by the static extension table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionDetector;

impl FormatDetector for ExtensionDetector {
    fn detect(&self, path: &str) -> Option<String> {
        let ext = extension(path)?;
        SUPPORTED.contains(&ext.as_str()).then_some(ext)
    }
}

/// Lowercase extension of the last path segment, without the dot.
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Last segment of a slash-separated path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// File name with its extension removed.
pub fn title_from_path(path: &str) -> String {
    let name = file_name(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

use std::path::{Path, PathBuf};

use url::Url;

/// File name taken from the URL's last path segment, or a random fallback.
pub fn get_filename_from_url(url_str: &str) -> String {
    if let Ok(url) = Url::parse(url_str) {
        if let Some(filename) = url.path_segments().and_then(|mut s| s.next_back()) {
            if !filename.is_empty() {
                return filename.to_string();
            }
        }
    }

    format!("download_{}", uuid::Uuid::new_v4())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Where a URL is saved inside `dir`. An existing file is overwritten.
pub fn destination_path(dir: &Path, url: &str) -> PathBuf {
    dir.join(sanitize_filename(&get_filename_from_url(url)))
}

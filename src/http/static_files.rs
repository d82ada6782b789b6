//! Static resources served from a directory on disk.

use std::io;
use std::path::{Path, PathBuf};

/// Resolves request URLs to files under `root` and reads them.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    index_file: String,
    dashboard_file: String,
}

impl StaticFiles {
    pub fn new(
        root: impl Into<PathBuf>,
        index_file: impl Into<String>,
        dashboard_file: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            index_file: index_file.into(),
            dashboard_file: dashboard_file.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dashboard_file(&self) -> &str {
        &self.dashboard_file
    }

    /// Maps a URL path to a path relative to the root.
    ///
    /// Anything containing `..` yields an empty string; `/` yields the index
    /// resource; otherwise the leading slash is dropped.
    ///
    /// ```
    /// # use relay::http::static_files::StaticFiles;
    /// let files = StaticFiles::new(".", "html/index.html", "html/dashboard.html");
    /// assert_eq!(files.url_to_file_path("/"), "html/index.html");
    /// assert_eq!(files.url_to_file_path("/favicon.ico"), "favicon.ico");
    /// assert_eq!(files.url_to_file_path("/../etc/passwd"), "");
    /// ```
    pub fn url_to_file_path(&self, url: &str) -> String {
        if url.contains("..") {
            return String::new();
        }
        if url == "/" {
            return self.index_file.clone();
        }
        url.strip_prefix('/').unwrap_or(url).to_string()
    }

    /// Reads a file previously resolved by [`url_to_file_path`](Self::url_to_file_path).
    pub fn read_file(&self, relative: &str) -> io::Result<Vec<u8>> {
        if relative.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "empty path"));
        }
        std::fs::read(self.root.join(relative))
    }
}

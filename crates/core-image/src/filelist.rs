//! Sorted pattern file lists.
//!
//! A projector's structured-light sequence is a directory of numbered PNG
//! files. The list is scanned once, sorted by filename so the sequence
//! order matches the naming convention, and can be rescanned in place when
//! the operator changes the input directory contents.

use std::path::{Path, PathBuf};

use crate::ImageError;

/// Immutable-order listing of the pattern images in one directory.
#[derive(Debug, Clone)]
pub struct FileList {
    directory: PathBuf,
    files: Vec<PathBuf>,
}

impl FileList {
    /// Scan `directory` for PNG files. Fails if the path is not a
    /// directory; an empty directory yields an empty list (the decoder
    /// reports starvation separately).
    pub fn scan(directory: &Path) -> Result<Self, ImageError> {
        let mut list = Self {
            directory: directory.to_path_buf(),
            files: Vec::new(),
        };
        list.rescan()?;
        Ok(list)
    }

    /// Re-read the directory, replacing the current listing.
    pub fn rescan(&mut self) -> Result<(), ImageError> {
        if !self.directory.is_dir() {
            return Err(ImageError::NotADirectory(self.directory.clone()));
        }
        let entries = std::fs::read_dir(&self.directory).map_err(|source| ImageError::Io {
            path: self.directory.clone(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .collect();
        files.sort();
        tracing::debug!(
            target: "image.filelist",
            directory = %self.directory.display(),
            count = files.len(),
            "scanned pattern directory"
        );
        self.files = files;
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Point the list at a new directory and rescan.
    pub fn set_directory(&mut self, directory: &Path) -> Result<(), ImageError> {
        self.directory = directory.to_path_buf();
        self.rescan()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path of the file at sequence position `index`.
    pub fn file_at(&self, index: usize) -> Option<&Path> {
        self.files.get(index).map(|p| p.as_path())
    }

    /// Filename stem at `index`, used to derive frame filenames.
    pub fn stem_at(&self, index: usize) -> Option<&str> {
        self.files
            .get(index)
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn scan_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("002_b.png"));
        touch(&dir.path().join("001_a.png"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("003_c.PNG"));

        let list = FileList::scan(dir.path()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.stem_at(0), Some("001_a"));
        assert_eq!(list.stem_at(1), Some("002_b"));
        assert_eq!(list.stem_at(2), Some("003_c"));
        assert!(list.file_at(3).is_none());
    }

    #[test]
    fn rescan_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("001.png"));
        let mut list = FileList::scan(dir.path()).unwrap();
        assert_eq!(list.len(), 1);

        touch(&dir.path().join("000.png"));
        list.rescan().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.stem_at(0), Some("000"));
    }

    #[test]
    fn non_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.png");
        touch(&file);
        assert!(matches!(
            FileList::scan(&file),
            Err(ImageError::NotADirectory(_))
        ));
    }
}

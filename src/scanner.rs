use crate::errors::{AppError, AppResult};
use crate::models::{FileSystemItem, ItemKind};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;

const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub skip_hidden: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { skip_hidden: true }
    }
}

/// Lists the entries of `root`, descending into sub-folders. Symlinked
/// directories are reported as folders without children.
pub fn scan_folder(root: &Path, options: &ScanOptions) -> AppResult<Vec<FileSystemItem>> {
    if !root.exists() {
        tracing::warn!(path = %root.display(), "scan target does not exist");
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        return Err(AppError::Validation(format!(
            "'{}' is not a folder.",
            root.display()
        )));
    }

    let entries = fs::read_dir(root)?;
    Ok(collect_entries(root, entries, options))
}

fn scan_children(root: &Path, dir: &Path, options: &ScanOptions) -> Vec<FileSystemItem> {
    match fs::read_dir(dir) {
        Ok(entries) => collect_entries(root, entries, options),
        Err(error) => {
            tracing::warn!(path = %dir.display(), error = %error, "skipping unreadable folder");
            Vec::new()
        }
    }
}

fn collect_entries(root: &Path, entries: fs::ReadDir, options: &ScanOptions) -> Vec<FileSystemItem> {
    let mut items = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(error = %error, "skipping unreadable entry");
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        if options.skip_hidden && is_hidden_name(&name) {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(error) => {
                tracing::warn!(path = %entry.path().display(), error = %error, "skipping entry without type");
                continue;
            }
        };

        let path = entry.path();
        let relative = relative_id(root, &path);
        let is_dir = if file_type.is_symlink() {
            path.is_dir()
        } else {
            file_type.is_dir()
        };

        if is_dir {
            let children = if file_type.is_symlink() {
                Vec::new()
            } else {
                scan_children(root, &path, options)
            };
            items.push(FileSystemItem {
                id: format!("folder-{}", relative),
                name,
                kind: ItemKind::Folder,
                path: path.to_string_lossy().into_owned(),
                size: None,
                size_bytes: None,
                extension: None,
                children,
            });
        } else {
            let size_bytes = entry.metadata().map(|meta| meta.len()).ok();
            items.push(FileSystemItem {
                id: format!("file-{}", relative),
                name,
                kind: ItemKind::File,
                extension: Some(file_extension(&path)),
                path: path.to_string_lossy().into_owned(),
                size: size_bytes.map(format_size),
                size_bytes,
                children: Vec::new(),
            });
        }
    }

    items.sort_by(compare_items);
    items
}

fn compare_items(left: &FileSystemItem, right: &FileSystemItem) -> Ordering {
    let rank = |item: &FileSystemItem| match item.kind {
        ItemKind::Folder => 0,
        ItemKind::File => 1,
    };
    rank(left)
        .cmp(&rank(right))
        .then_with(|| left.name.to_lowercase().cmp(&right.name.to_lowercase()))
        .then_with(|| left.name.cmp(&right.name))
}

fn relative_id(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Lowercased extension with its leading dot, or an empty string.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, SIZE_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::{file_extension, format_size, scan_folder, ScanOptions};
    use crate::errors::AppError;
    use crate::models::ItemKind;
    use std::fs;
    use std::path::Path;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(u64::MAX), "16384.00 PB");
    }

    #[test]
    fn extensions_are_lowercased_with_dot() {
        assert_eq!(file_extension(Path::new("/tmp/Report.PDF")), ".pdf");
        assert_eq!(file_extension(Path::new("/tmp/archive.tar.gz")), ".gz");
        assert_eq!(file_extension(Path::new("/tmp/Makefile")), "");
    }

    #[test]
    fn scan_lists_folders_first_with_children() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("photos")).expect("photos");
        fs::write(dir.path().join("photos").join("beach.JPG"), b"jpeg").expect("beach");
        fs::write(dir.path().join("b.txt"), b"hello").expect("b");
        fs::write(dir.path().join("A.md"), b"# a").expect("a");
        fs::write(dir.path().join(".hidden"), b"secret").expect("hidden");

        let items = scan_folder(dir.path(), &ScanOptions::default()).expect("scan");
        let names: Vec<&str> = items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, vec!["photos", "A.md", "b.txt"]);

        let photos = &items[0];
        assert_eq!(photos.kind, ItemKind::Folder);
        assert_eq!(photos.id, "folder-photos");
        assert_eq!(photos.children.len(), 1);
        assert_eq!(photos.children[0].id, "file-photos/beach.JPG");
        assert_eq!(photos.children[0].extension.as_deref(), Some(".jpg"));

        let text = &items[2];
        assert_eq!(text.size.as_deref(), Some("5.00 B"));
        assert_eq!(text.size_bytes, Some(5));

        let with_hidden = scan_folder(dir.path(), &ScanOptions { skip_hidden: false }).expect("scan");
        assert_eq!(with_hidden.len(), 4);
    }

    #[test]
    fn missing_folder_is_empty_and_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = scan_folder(&dir.path().join("nope"), &ScanOptions::default()).expect("scan");
        assert!(missing.is_empty());

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").expect("file");
        let err = scan_folder(&file, &ScanOptions::default()).expect_err("file is not a folder");
        assert!(matches!(err, AppError::Validation(_)));
    }
}

use crate::errors::{AppError, AppResult};
use crate::models::{MoveOutcome, OrganizationRule, PlannedMove};
use crate::scanner::{file_extension, is_hidden_name};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const NO_EXTENSION_FOLDER: &str = "no_extension";

#[derive(Debug, Clone, Copy)]
pub struct RulePreset {
    pub folder_name: &'static str,
    pub extensions: &'static [&'static str],
}

const RULE_PRESETS: &[RulePreset] = &[
    RulePreset {
        folder_name: "Images",
        extensions: &[".jpg", ".png", ".gif"],
    },
    RulePreset {
        folder_name: "Documents",
        extensions: &[".doc", ".docx", ".pdf", ".txt"],
    },
    RulePreset {
        folder_name: "Videos",
        extensions: &[".mp4", ".avi", ".mov"],
    },
    RulePreset {
        folder_name: "Audio",
        extensions: &[".mp3", ".wav", ".flac"],
    },
    RulePreset {
        folder_name: "Archives",
        extensions: &[".zip", ".rar", ".7z"],
    },
    RulePreset {
        folder_name: "Code",
        extensions: &[".js", ".py", ".html", ".css"],
    },
];

pub fn default_rule_presets() -> &'static [RulePreset] {
    RULE_PRESETS
}

/// Trims, lowercases and dots each extension. Duplicates collapse onto the
/// first occurrence.
pub fn normalize_extensions(raw: &[String]) -> AppResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for value in raw {
        let trimmed = value.trim().trim_start_matches('*').trim().to_lowercase();
        if trimmed.is_empty() || trimmed == "." {
            continue;
        }
        let dotted = if trimmed.starts_with('.') {
            trimmed
        } else {
            format!(".{}", trimmed)
        };
        if !normalized.contains(&dotted) {
            normalized.push(dotted);
        }
    }

    if normalized.is_empty() {
        return Err(AppError::Validation(
            "At least one file extension is required.".to_string(),
        ));
    }
    Ok(normalized)
}

pub fn validate_folder_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Folder name must not be empty.".to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name.to_string()),
        _ => Err(AppError::Validation(format!(
            "Folder name '{}' must be a single folder inside the base folder.",
            name
        ))),
    }
}

/// Computes where every misplaced file under `base_folder` should go. The
/// first enabled rule listing a file's extension wins, and files anywhere
/// inside that rule's folder stay where they are.
pub fn plan_moves(base_folder: &Path, rules: &[OrganizationRule], skip_hidden: bool) -> AppResult<Vec<PlannedMove>> {
    if !base_folder.is_dir() {
        return Err(AppError::NotFound(format!(
            "Folder '{}' does not exist.",
            base_folder.display()
        )));
    }

    let enabled: Vec<&OrganizationRule> = rules.iter().filter(|rule| rule.enabled).collect();
    if enabled.is_empty() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(base_folder)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(skip_hidden && entry.depth() > 0 && is_hidden_name(&entry.file_name().to_string_lossy()))
        });

    let mut plans = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(error = %error, "skipping unreadable path while planning");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let source = entry.path();
        let extension = file_extension(source);
        if extension.is_empty() {
            continue;
        }
        let Some(rule) = enabled
            .iter()
            .find(|rule| rule.extensions.iter().any(|ext| ext == &extension))
        else {
            continue;
        };

        let target_dir = PathBuf::from(&rule.full_path);
        if source.starts_with(&target_dir) {
            continue;
        }

        plans.push(PlannedMove {
            source: source.to_string_lossy().into_owned(),
            destination: target_dir.join(entry.file_name()).to_string_lossy().into_owned(),
            rule_id: rule.id.clone(),
            folder_name: rule.folder_name.clone(),
        });
    }

    Ok(plans)
}

/// Runs every planned move. Failures are recorded per file and do not stop
/// the remaining moves.
pub fn execute_moves(plans: &[PlannedMove]) -> Vec<MoveOutcome> {
    plans
        .iter()
        .map(|plan| {
            let result = move_file(Path::new(&plan.source), Path::new(&plan.destination));
            outcome(&plan.source, &plan.destination, result)
        })
        .collect()
}

/// Moves each top-level file of `folder` into a sub-folder named after its
/// extension.
pub fn organize_by_extension(folder: &Path, skip_hidden: bool) -> AppResult<Vec<MoveOutcome>> {
    if !folder.is_dir() {
        return Err(AppError::NotFound(format!(
            "Folder '{}' does not exist.",
            folder.display()
        )));
    }

    let mut sources = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if skip_hidden && is_hidden_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        sources.push(entry.path());
    }
    sources.sort();

    let outcomes = sources
        .into_iter()
        .map(|source| {
            let extension = file_extension(&source);
            let subfolder = extension
                .strip_prefix('.')
                .filter(|ext| !ext.is_empty())
                .unwrap_or(NO_EXTENSION_FOLDER)
                .to_string();
            let destination = match source.file_name() {
                Some(name) => folder.join(subfolder).join(name),
                None => folder.join(subfolder),
            };
            let result = move_file(&source, &destination);
            outcome(
                &source.to_string_lossy(),
                &destination.to_string_lossy(),
                result,
            )
        })
        .collect();

    Ok(outcomes)
}

/// Moves one file, creating the destination folder. An existing destination
/// is never overwritten.
pub fn move_file(source: &Path, destination: &Path) -> AppResult<()> {
    if !source.is_file() {
        return Err(AppError::NotFound(format!(
            "Source file '{}' does not exist.",
            source.display()
        )));
    }
    if destination.exists() {
        return Err(AppError::Conflict(format!(
            "Destination '{}' already exists.",
            destination.display()
        )));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(error) if is_cross_device(&error) => copy_then_remove(source, destination),
        Err(error) => Err(error.into()),
    }
}

#[cfg(unix)]
fn is_cross_device(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_error: &std::io::Error) -> bool {
    false
}

/// Copies `source` to `destination` and removes the source. On any failure
/// the destination copy is removed so the file lives in exactly one place.
fn copy_then_remove(source: &Path, destination: &Path) -> AppResult<()> {
    if let Err(error) = fs::copy(source, destination) {
        discard_partial_copy(destination);
        return Err(error.into());
    }
    if let Err(error) = fs::remove_file(source) {
        discard_partial_copy(destination);
        return Err(error.into());
    }
    Ok(())
}

fn discard_partial_copy(destination: &Path) {
    if !destination.exists() {
        return;
    }
    if let Err(error) = fs::remove_file(destination) {
        tracing::warn!(destination = %destination.display(), error = %error, "failed to remove partial copy");
    }
}

fn outcome(source: &str, destination: &str, result: AppResult<()>) -> MoveOutcome {
    match result {
        Ok(()) => MoveOutcome {
            source: source.to_string(),
            destination: Some(destination.to_string()),
            success: true,
            error: None,
        },
        Err(error) => {
            tracing::warn!(source = %source, destination = %destination, error = %error, "file move failed");
            MoveOutcome {
                source: source.to_string(),
                destination: None,
                success: false,
                error: Some(error.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        copy_then_remove, default_rule_presets, execute_moves, is_cross_device, normalize_extensions,
        organize_by_extension, plan_moves, validate_folder_name,
    };
    use crate::errors::AppError;
    use crate::models::OrganizationRule;
    use chrono::Utc;
    use std::fs;
    use std::path::Path;

    fn rule(base: &Path, folder: &str, extensions: &[&str], enabled: bool) -> OrganizationRule {
        OrganizationRule {
            id: format!("rule-{}", folder),
            base_folder: base.to_string_lossy().into_owned(),
            folder_name: folder.to_string(),
            full_path: base.join(folder).to_string_lossy().into_owned(),
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
            enabled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn extensions_are_normalized() {
        let normalized = normalize_extensions(&[
            " PDF ".to_string(),
            ".Txt".to_string(),
            "*.md".to_string(),
            "pdf".to_string(),
            "".to_string(),
        ])
        .expect("normalize");
        assert_eq!(normalized, vec![".pdf", ".txt", ".md"]);
        assert!(normalize_extensions(&[" ".to_string(), ".".to_string()]).is_err());
    }

    #[test]
    fn folder_names_must_be_single_components() {
        assert_eq!(validate_folder_name("  Images ").expect("valid"), "Images");
        assert!(validate_folder_name("").is_err());
        assert!(validate_folder_name("..").is_err());
        assert!(validate_folder_name("a/b").is_err());
        assert!(validate_folder_name("/abs").is_err());
    }

    #[test]
    fn presets_cover_common_types() {
        let presets = default_rule_presets();
        assert_eq!(presets.len(), 6);
        assert!(presets
            .iter()
            .any(|preset| preset.folder_name == "Images" && preset.extensions.contains(&".png")));
    }

    #[test]
    fn plan_skips_files_already_in_place_and_first_rule_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path();
        fs::create_dir(base.join("Images")).expect("images dir");
        fs::write(base.join("Images").join("done.png"), b"png").expect("placed");
        fs::write(base.join("shot.PNG"), b"png").expect("shot");
        fs::write(base.join("notes.txt"), b"txt").expect("notes");
        fs::create_dir(base.join("nested")).expect("nested");
        fs::write(base.join("nested").join("deep.png"), b"png").expect("deep");
        fs::write(base.join("README"), b"none").expect("readme");

        let rules = vec![
            rule(base, "Images", &[".png"], true),
            rule(base, "Screens", &[".png"], true),
            rule(base, "Text", &[".txt"], false),
        ];
        let plans = plan_moves(base, &rules, true).expect("plan");

        let sources: Vec<String> = plans
            .iter()
            .map(|plan| {
                Path::new(&plan.source)
                    .strip_prefix(base)
                    .expect("under base")
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(sources, vec!["nested/deep.png", "shot.PNG"]);
        assert!(plans.iter().all(|plan| plan.folder_name == "Images"));
        assert_eq!(
            Path::new(&plans[1].destination),
            base.join("Images").join("shot.PNG").as_path()
        );
    }

    #[test]
    fn plan_leaves_nested_files_inside_their_rule_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path();
        fs::create_dir_all(base.join("Images").join("2023")).expect("year dir");
        fs::write(base.join("Images").join("2023").join("a.png"), b"png").expect("nested");
        fs::create_dir(base.join("Screens")).expect("screens dir");
        fs::write(base.join("Screens").join("b.png"), b"png").expect("claimed elsewhere");

        let rules = vec![
            rule(base, "Images", &[".png"], true),
            rule(base, "Screens", &[".png"], true),
        ];
        let plans = plan_moves(base, &rules, true).expect("plan");

        assert_eq!(plans.len(), 1);
        assert_eq!(Path::new(&plans[0].source), base.join("Screens").join("b.png").as_path());
        assert_eq!(
            Path::new(&plans[0].destination),
            base.join("Images").join("b.png").as_path()
        );
    }

    #[test]
    fn only_cross_device_errors_fall_back_to_copy() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(!is_cross_device(&denied));
        #[cfg(unix)]
        assert!(is_cross_device(&std::io::Error::from_raw_os_error(libc::EXDEV)));
    }

    #[test]
    fn failed_copy_reports_its_error_and_leaves_no_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("not-a-file");
        fs::create_dir(&source).expect("source dir");
        let destination = dir.path().join("out").join("copy");
        fs::create_dir_all(destination.parent().expect("parent")).expect("out dir");

        let result = copy_then_remove(&source, &destination);
        assert!(matches!(result, Err(AppError::Io(_))));
        assert!(!destination.exists());
        assert!(source.exists());
    }

    #[test]
    fn copy_then_remove_moves_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("a.txt");
        fs::write(&source, b"hello").expect("source");
        let destination = dir.path().join("b.txt");

        copy_then_remove(&source, &destination).expect("move");
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).expect("moved"), b"hello");
    }

    #[test]
    fn execute_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path();
        fs::create_dir(base.join("Docs")).expect("docs");
        fs::write(base.join("Docs").join("a.pdf"), b"old").expect("existing");
        fs::create_dir(base.join("inbox")).expect("inbox");
        fs::write(base.join("inbox").join("a.pdf"), b"new").expect("incoming");
        fs::write(base.join("b.pdf"), b"b").expect("b");

        let rules = vec![rule(base, "Docs", &[".pdf"], true)];
        let plans = plan_moves(base, &rules, true).expect("plan");
        assert_eq!(plans.len(), 2);

        let outcomes = execute_moves(&plans);
        assert_eq!(outcomes.iter().filter(|outcome| outcome.success).count(), 1);
        let failed = outcomes.iter().find(|outcome| !outcome.success).expect("conflict");
        assert!(failed.error.as_deref().unwrap_or_default().starts_with("CONFLICT"));
        assert_eq!(fs::read(base.join("Docs").join("a.pdf")).expect("kept"), b"old");
        assert!(base.join("inbox").join("a.pdf").exists());
        assert!(base.join("Docs").join("b.pdf").exists());
    }

    #[test]
    fn organize_by_extension_groups_top_level_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path();
        fs::write(base.join("song.MP3"), b"mp3").expect("song");
        fs::write(base.join("LICENSE"), b"mit").expect("license");
        fs::create_dir(base.join("keep")).expect("keep");
        fs::write(base.join("keep").join("inner.mp3"), b"mp3").expect("inner");

        let outcomes = organize_by_extension(base, true).expect("organize");
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|outcome| outcome.success));
        assert!(base.join("mp3").join("song.MP3").exists());
        assert!(base.join("no_extension").join("LICENSE").exists());
        assert!(base.join("keep").join("inner.mp3").exists());
    }
}

use crate::errors::StepLogError;
use std::fs;
use std::path::{Path, PathBuf};

/// Delete the oldest `.jsonl` files in `dir` until their total size fits
/// `budget_bytes`. `keep` (the log currently being written) is never removed.
pub fn enforce_total_budget(
    dir: &Path,
    budget_bytes: u64,
    keep: &Path,
) -> Result<Vec<PathBuf>, StepLogError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| StepLogError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect::<Vec<_>>();

    files.sort_by(|a, b| {
        let ma = fs::metadata(a).ok().and_then(|m| m.modified().ok());
        let mb = fs::metadata(b).ok().and_then(|m| m.modified().ok());
        ma.cmp(&mb)
    });

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        if path == keep {
            continue;
        }
        let len = fs::metadata(&path)
            .map_err(|e| StepLogError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| StepLogError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::enforce_total_budget;
    use std::fs;

    #[test]
    fn prunes_oldest_files_until_budget_is_met() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.jsonl"), vec![0u8; 40]).expect("a");
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("b.jsonl"), vec![0u8; 40]).expect("b");

        fs::write(dir.path().join("notes.txt"), vec![0u8; 400]).expect("txt");

        let keep = dir.path().join("b.jsonl");
        let deleted = enforce_total_budget(dir.path(), 50, &keep).expect("pruned");
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].ends_with("a.jsonl"));
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn active_log_survives_even_when_over_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let active = dir.path().join("run.jsonl");
        fs::write(&active, vec![0u8; 100]).expect("active");

        let deleted = enforce_total_budget(dir.path(), 10, &active).expect("pruned");
        assert!(deleted.is_empty());
        assert!(active.exists());
    }
}

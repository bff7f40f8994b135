use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{RepoError, Result};

use super::atomic::read_file;

/// Parse a request filename per the grammar `^(\d+)-(\d+)-(\d+)\.json$`,
/// returning `(epoch, pid, counter)`. Anything that doesn't match is `None`
/// and the caller silently ignores the file.
fn parse_request_filename(name: &str) -> Option<(u64, u32, u64)> {
    let stem = name.strip_suffix(".json")?;
    let mut parts = stem.splitn(3, '-');
    let epoch = parts.next()?;
    let pid = parts.next()?;
    let counter = parts.next()?;

    if epoch.is_empty() || pid.is_empty() || counter.is_empty() {
        return None;
    }
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(epoch) || !all_digits(pid) || !all_digits(counter) {
        return None;
    }

    Some((epoch.parse().ok()?, pid.parse().ok()?, counter.parse().ok()?))
}

/// List `*.json` entries under `dir`, sorted ascending by `(epoch, pid,
/// counter)` parsed from the filename, and return the parsed contents of
/// each in that order. An absent directory yields an empty list. Filenames
/// that don't match the request grammar are ignored, not errors.
pub async fn load_all_in_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RepoError::io(dir, e)),
    };

    let mut named: Vec<(u64, u32, u64, std::path::PathBuf)> = Vec::new();
    loop {
        let entry = read_dir.next_entry().await.map_err(|e| RepoError::io(dir, e))?;
        let Some(entry) = entry else { break };
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !name.ends_with(".json") {
            continue;
        }
        if let Some((epoch, pid, counter)) = parse_request_filename(name) {
            named.push((epoch, pid, counter, entry.path()));
        }
    }

    named.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

    let mut values = Vec::with_capacity(named.len());
    for (_, _, _, path) in named {
        if let Some(value) = read_file(&path).await? {
            values.push(value);
        }
    }
    Ok(values)
}

/// Extract the first run of decimal digits from `name`, or `None` if it has
/// none.
fn first_digit_run(name: &str) -> Option<u64> {
    let mut chars = name.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            break;
        }
        chars.next();
    }
    let digits: String = chars.take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { digits.parse().ok() }
}

/// Given a list of existing names, find the maximum leading digit run across
/// all of them and substitute `max + 1` (or `0` if none) into `template` at
/// the `${index}` placeholder.
///
/// A general-purpose allocator for names whose "existing" set is always a
/// live, complete listing at call time. Not used for stub directory naming:
/// a deleted stub's directory is removed outright, so scanning `stubs/`
/// after a delete can no longer see the number it used, and this would
/// reallocate it. Stub directories are numbered from a persisted counter in
/// `imposter.json` instead (`ImposterHeader::next_stub_dir_index`).
pub fn next(existing: &[String], template: &str) -> String {
    let max = existing.iter().filter_map(|n| first_digit_run(n)).max();
    let index = max.map(|m| m + 1).unwrap_or(0);
    template.replace("${index}", &index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn next_with_no_existing_starts_at_zero() {
        assert_eq!(next(&[], "stubs/${index}"), "stubs/0");
    }

    #[test]
    fn next_picks_max_plus_one() {
        let existing = vec!["stubs/0".to_string(), "stubs/3".to_string(), "stubs/1".to_string()];
        assert_eq!(next(&existing, "stubs/${index}"), "stubs/4");
    }

    #[test]
    fn next_ignores_non_numeric_names() {
        let existing = vec!["stubs/abc".to_string()];
        assert_eq!(next(&existing, "stubs/${index}"), "stubs/0");
    }

    #[test]
    fn parse_filename_grammar() {
        assert_eq!(parse_request_filename("1700000000000-42-7.json"), Some((1700000000000, 42, 7)));
        assert_eq!(parse_request_filename("not-a-match.json"), None);
        assert_eq!(parse_request_filename("1-2.json"), None);
        assert_eq!(parse_request_filename("1-2-3-4.json"), None);
    }

    #[tokio::test]
    async fn load_all_in_dir_absent_is_empty() {
        let dir = TempDir::new().unwrap();
        let values: Vec<serde_json::Value> = load_all_in_dir(&dir.path().join("nope")).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn load_all_in_dir_sorts_by_epoch_pid_counter() {
        let dir = TempDir::new().unwrap();
        let requests = dir.path().join("requests");
        tokio::fs::create_dir_all(&requests).await.unwrap();

        for (epoch, pid, counter) in [(200, 1, 0), (100, 5, 0), (100, 1, 1), (100, 1, 0)] {
            let name = format!("{epoch}-{pid}-{counter}.json");
            let body = json!({"epoch": epoch, "pid": pid, "counter": counter});
            tokio::fs::write(requests.join(name), serde_json::to_vec(&body).unwrap())
                .await
                .unwrap();
        }
        tokio::fs::write(requests.join("garbage.txt"), b"ignored").await.unwrap();
        tokio::fs::write(requests.join("not-matching.json"), b"{}").await.unwrap();

        let values: Vec<serde_json::Value> = load_all_in_dir(&requests).await.unwrap();
        let order: Vec<(i64, i64, i64)> = values
            .iter()
            .map(|v| (
                v["epoch"].as_i64().unwrap(),
                v["pid"].as_i64().unwrap(),
                v["counter"].as_i64().unwrap(),
            ))
            .collect();
        assert_eq!(order, vec![(100, 1, 0), (100, 1, 1), (100, 5, 0), (200, 1, 0)]);
    }
}

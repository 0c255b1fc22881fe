use crate::config::CollisionPolicy;
use crate::error::{IntakeError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest filename most filesystems accept, in bytes
const MAX_FILENAME_LEN: usize = 255;

/// Suffixes tried under [`CollisionPolicy::Rename`] before giving up
const MAX_RENAME_ATTEMPTS: usize = 1000;

/// Reduce a sender-supplied filename to a single safe path component.
///
/// Directory parts (either separator style) are dropped, control characters
/// removed, characters reserved on common filesystems replaced with `_`, and
/// leading dots stripped so the result can be neither `.`, `..` nor hidden.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned
        .trim()
        .trim_start_matches('.')
        .trim_end_matches(['.', ' '])
        .to_string();

    if cleaned.is_empty() {
        return None;
    }
    Some(truncate_filename(cleaned))
}

fn truncate_filename(name: String) -> String {
    if name.len() <= MAX_FILENAME_LEN {
        return name;
    }

    let (stem, ext) = split_extension(&name);
    let ext_len = ext.map_or(0, |e| e.len() + 1);
    let budget = MAX_FILENAME_LEN.saturating_sub(ext_len);
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    match ext {
        Some(ext) if ext_len < MAX_FILENAME_LEN => format!("{}.{}", &stem[..cut], ext),
        _ => {
            let mut cut = MAX_FILENAME_LEN;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name[..cut].to_string()
        }
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// `report.txt` -> `report-2.txt`
fn suffixed(name: &str, n: usize) -> String {
    match split_extension(name) {
        (stem, Some(ext)) => format!("{}-{}.{}", stem, n, ext),
        (stem, None) => format!("{}-{}", stem, n),
    }
}

/// An attachment ready to be written. The filename is always sanitized and
/// non-empty; construction fails otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRecord {
    session_id: String,
    filename: String,
    data: Vec<u8>,
}

impl AttachmentRecord {
    pub fn new(session_id: impl Into<String>, filename: &str, data: Vec<u8>) -> Result<Self> {
        let sanitized = sanitize_filename(filename)
            .ok_or_else(|| IntakeError::InvalidFilename(filename.to_string()))?;

        Ok(Self {
            session_id: session_id.into(),
            filename: sanitized,
            data,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// Writes attachments as individual files directly under one directory.
///
/// Each file is first written under a hidden temporary name and then moved
/// into place, so a reader never sees a half-written attachment under its
/// final name.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    policy: CollisionPolicy,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>, policy: CollisionPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Persist `record`, returning the path it was written to.
    pub async fn save(&self, record: AttachmentRecord) -> Result<PathBuf> {
        self.ensure_directory().await?;

        let tmp_path = self.root.join(format!(".intake-{}.tmp", Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp_path, &record.data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(IntakeError::Storage(format!(
                "Failed to write {:?}: {}",
                tmp_path, e
            )));
        }

        let placed = match self.policy {
            CollisionPolicy::Overwrite => {
                let target = self.root.join(&record.filename);
                fs::rename(&tmp_path, &target)
                    .await
                    .map(|_| target)
                    .map_err(|e| {
                        IntakeError::Storage(format!("Failed to move attachment into place: {}", e))
                    })
            }
            CollisionPolicy::Reject => self.claim(&tmp_path, &record.filename, 1).await,
            CollisionPolicy::Rename => {
                self.claim(&tmp_path, &record.filename, MAX_RENAME_ATTEMPTS)
                    .await
            }
        };

        if !matches!(self.policy, CollisionPolicy::Overwrite) || placed.is_err() {
            if let Err(e) = fs::remove_file(&tmp_path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove temporary file {:?}: {}", tmp_path, e);
                }
            }
        }

        let path = placed?;
        info!(
            session = %record.session_id,
            filename = %record.filename,
            size = record.data.len(),
            "Saved attachment to {}",
            path.display()
        );
        Ok(path)
    }

    /// Link `tmp_path` to the first free name among `filename`,
    /// `filename-1`, ... The link fails atomically if the name is taken, so
    /// concurrent sessions never clobber each other.
    async fn claim(&self, tmp_path: &Path, filename: &str, attempts: usize) -> Result<PathBuf> {
        for n in 0..attempts {
            let candidate = if n == 0 {
                filename.to_string()
            } else {
                suffixed(filename, n)
            };
            let target = self.root.join(&candidate);

            match fs::hard_link(tmp_path, &target).await {
                Ok(()) => return Ok(target),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Attachment name {} taken", candidate);
                }
                Err(e) => {
                    return Err(IntakeError::Storage(format!(
                        "Failed to place attachment {}: {}",
                        candidate, e
                    )))
                }
            }
        }

        Err(IntakeError::AttachmentExists(filename.to_string()))
    }

    async fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            IntakeError::Storage(format!("Failed to create directory {:?}: {}", self.root, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_name() {
        assert_eq!(sanitize_filename("report.txt").as_deref(), Some("report.txt"));
        assert_eq!(sanitize_filename("  spaced out.pdf ").as_deref(), Some("spaced out.pdf"));
    }

    #[test]
    fn test_sanitize_path_traversal() {
        assert_eq!(sanitize_filename("../../evil.txt").as_deref(), Some("evil.txt"));
        assert_eq!(sanitize_filename("..\\..\\evil.txt").as_deref(), Some("evil.txt"));
        assert_eq!(sanitize_filename("/etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\Windows\\win.ini").as_deref(), Some("win.ini"));
    }

    #[test]
    fn test_sanitize_rejects_empty_results() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("."), None);
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename("\u{0}\u{7}"), None);
    }

    #[test]
    fn test_sanitize_reserved_and_control_chars() {
        assert_eq!(sanitize_filename("a<b>:c?.txt").as_deref(), Some("a_b__c_.txt"));
        assert_eq!(sanitize_filename("new\r\nline.txt").as_deref(), Some("newline.txt"));
        assert_eq!(sanitize_filename(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_filename("trailing. . ").as_deref(), Some("trailing"));
    }

    #[test]
    fn test_sanitize_truncates_long_names() {
        let long = format!("{}.csv", "x".repeat(400));
        let sanitized = sanitize_filename(&long).unwrap();
        assert_eq!(sanitized.len(), MAX_FILENAME_LEN);
        assert!(sanitized.ends_with(".csv"));
    }

    #[test]
    fn test_suffixed() {
        assert_eq!(suffixed("report.txt", 1), "report-1.txt");
        assert_eq!(suffixed("archive.tar.gz", 2), "archive.tar-2.gz");
        assert_eq!(suffixed("README", 3), "README-3");
    }

    #[test]
    fn test_record_rejects_unusable_name() {
        let result = AttachmentRecord::new("s1", "../", b"x".to_vec());
        assert!(matches!(result, Err(IntakeError::InvalidFilename(_))));
    }

    fn list_dir(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_save_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested").join("attachments");
        let store = AttachmentStore::new(&root, CollisionPolicy::Rename);

        let record = AttachmentRecord::new("s1", "report.txt", b"Hello".to_vec()).unwrap();
        let path = store.save(record).await.unwrap();

        assert_eq!(path, root.join("report.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"Hello");
        assert_eq!(list_dir(&root), vec!["report.txt"]);
    }

    #[tokio::test]
    async fn test_traversal_name_stays_in_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("inbox");
        let store = AttachmentStore::new(&root, CollisionPolicy::Rename);

        let record = AttachmentRecord::new("s1", "../../evil.txt", b"x".to_vec()).unwrap();
        let path = store.save(record).await.unwrap();

        assert_eq!(path.parent(), Some(root.as_path()));
        assert_eq!(list_dir(tmp.path()), vec!["inbox"]);
    }

    #[tokio::test]
    async fn test_rename_policy_keeps_both() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(tmp.path(), CollisionPolicy::Rename);

        for body in [&b"first"[..], &b"second"[..], &b"third"[..]] {
            let record = AttachmentRecord::new("s1", "report.txt", body.to_vec()).unwrap();
            store.save(record).await.unwrap();
        }

        assert_eq!(
            list_dir(tmp.path()),
            vec!["report-1.txt", "report-2.txt", "report.txt"]
        );
        assert_eq!(std::fs::read(tmp.path().join("report.txt")).unwrap(), b"first");
        assert_eq!(std::fs::read(tmp.path().join("report-2.txt")).unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_overwrite_policy_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(tmp.path(), CollisionPolicy::Overwrite);

        for body in [&b"old"[..], &b"new"[..]] {
            let record = AttachmentRecord::new("s1", "data.bin", body.to_vec()).unwrap();
            store.save(record).await.unwrap();
        }

        assert_eq!(list_dir(tmp.path()), vec!["data.bin"]);
        assert_eq!(std::fs::read(tmp.path().join("data.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_reject_policy_keeps_original() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(tmp.path(), CollisionPolicy::Reject);

        let first = AttachmentRecord::new("s1", "data.bin", b"old".to_vec()).unwrap();
        store.save(first).await.unwrap();

        let second = AttachmentRecord::new("s2", "data.bin", b"new".to_vec()).unwrap();
        let result = store.save(second).await;

        assert!(matches!(result, Err(IntakeError::AttachmentExists(_))));
        assert_eq!(list_dir(tmp.path()), vec!["data.bin"]);
        assert_eq!(std::fs::read(tmp.path().join("data.bin")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_unwritable_root_is_storage_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = AttachmentStore::new(blocker.join("attachments"), CollisionPolicy::Rename);
        let record = AttachmentRecord::new("s1", "a.txt", b"x".to_vec()).unwrap();

        assert!(matches!(store.save(record).await, Err(IntakeError::Storage(_))));
    }
}

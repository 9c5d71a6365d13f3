//! Filesystem collaborators used by the terminal shell

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ArtifactExporter, BackendError, ConversationStore, CurriculumSource, ProfileStore, TextExtractor};
use crate::domain::{Artifact, ConversationSummary, StoredConversation, UsageState};

/// Extensions tried, in order, for a curriculum module file
const CURRICULUM_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// Default wait for an external extraction program
const EXTRACT_TIMEOUT_MS: u64 = 30_000;

/// Reject ids that could escape the storage directory
fn safe_file_stem(id: &str) -> Option<&str> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !id.contains("..");
    ok.then_some(id)
}

/// Usage counters for all local users in a single JSON document
pub struct JsonProfileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, UsageState>, BackendError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, profiles: &BTreeMap<String, UsageState>) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(profiles)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Overwrite a user's usage (tier changes come from outside the session)
    pub async fn set_usage(&self, user_id: &str, usage: UsageState) -> Result<(), BackendError> {
        let _guard = self.lock.lock().await;
        let mut profiles = self.read_all().await?;
        profiles.insert(user_id.to_string(), usage);
        self.write_all(&profiles).await
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn get_usage(&self, user_id: &str) -> Result<UsageState, BackendError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.get(user_id).copied().unwrap_or_default())
    }

    async fn increment_usage(&self, user_id: &str) -> Result<(), BackendError> {
        let _guard = self.lock.lock().await;
        let mut profiles = self.read_all().await?;
        profiles.entry(user_id.to_string()).or_default().record_interaction();
        self.write_all(&profiles).await
    }
}

/// Curriculum modules stored as `<dir>/<MODULE_ID>.md` or `.txt`
pub struct DirCurriculum {
    dir: PathBuf,
}

impl DirCurriculum {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CurriculumSource for DirCurriculum {
    async fn fetch_module_text(&self, module_id: &str) -> Result<Option<String>, BackendError> {
        let Some(stem) = safe_file_stem(module_id) else {
            debug!(%module_id, "DirCurriculum: rejected module id");
            return Ok(None);
        };

        for ext in CURRICULUM_EXTENSIONS {
            let path = self.dir.join(format!("{}.{}", stem, ext));
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => return Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

/// Extracts PDF text by piping bytes through an external program
///
/// The program must read the document from stdin and write text to stdout,
/// e.g. `pdftotext - -`.
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_millis(EXTRACT_TIMEOUT_MS),
        }
    }

    /// `pdftotext - -` from poppler-utils
    pub fn pdftotext() -> Self {
        Self::new("pdftotext", vec!["-".to_string(), "-".to_string()])
    }

    async fn run(&self, bytes: &[u8]) -> Result<String, BackendError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Extraction(format!("failed to start {}: {}", self.program, e)))?;

        // stdin is fed concurrently with draining stdout
        let writer = child.stdin.take().map(|mut stdin| {
            let input = bytes.to_vec();
            tokio::spawn(async move { stdin.write_all(&input).await })
        });

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer
            && let Ok(Err(e)) = writer.await
        {
            debug!(error = %e, "CommandExtractor: program closed stdin early");
        }
        if !output.status.success() {
            return Err(BackendError::Extraction(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TextExtractor for CommandExtractor {
    async fn extract_text(&self, bytes: &[u8], mime_type: &str) -> Result<String, BackendError> {
        debug!(program = %self.program, %mime_type, len = bytes.len(), "CommandExtractor::extract_text: called");
        match tokio::time::timeout(self.timeout, self.run(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Extraction(format!(
                "{} timed out after {:?}",
                self.program, self.timeout
            ))),
        }
    }
}

/// Writes artifacts into a directory
pub struct DirExporter {
    dir: PathBuf,
}

impl DirExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactExporter for DirExporter {
    fn export(&self, artifact: &Artifact) -> Result<String, BackendError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&artifact.filename);
        std::fs::write(&path, &artifact.content)?;
        info!(path = %path.display(), kind = %artifact.kind, "Artifact exported");
        Ok(path.display().to_string())
    }
}

/// One JSON file per conversation
pub struct JsonConversationStore {
    dir: PathBuf,
}

impl JsonConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        safe_file_stem(id).map(|stem| self.dir.join(format!("{}.json", stem)))
    }

    async fn read(path: &Path) -> Result<StoredConversation, BackendError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn save(&self, conversation: &StoredConversation) -> Result<(), BackendError> {
        let path = self
            .path_for(&conversation.id)
            .ok_or_else(|| BackendError::NotFound(format!("invalid conversation id {}", conversation.id)))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(conversation)?;
        tokio::fs::write(&path, json).await?;
        debug!(path = %path.display(), "JsonConversationStore::save: written");
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ConversationSummary>, BackendError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(conv) if conv.user_id == user_id => summaries.push(conv.summary()),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable conversation file"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn load(&self, id: &str) -> Result<Option<StoredConversation>, BackendError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        match Self::read(&path).await {
            Ok(conv) => Ok(Some(conv)),
            Err(BackendError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let path = self
            .path_for(id)
            .ok_or_else(|| BackendError::NotFound(format!("conversation {}", id)))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(format!("conversation {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

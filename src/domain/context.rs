//! Context configuration - the grounding material of a planning session
//!
//! A session carries two of these: the *active* one grounds the conversation,
//! the *draft* one collects edits until the user applies them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A reference file uploaded by the user, already reduced to plain text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub extracted_text: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl UploadedFile {
    /// Create an active uploaded file
    pub fn new(name: impl Into<String>, extracted_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extracted_text: extracted_text.into(),
            is_active: true,
        }
    }
}

/// Modules, files, cycle and wishes that ground AI generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfiguration {
    /// Selected curriculum modules (membership only, order irrelevant)
    pub selected_module_ids: BTreeSet<String>,

    /// Uploaded reference files in upload order
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFile>,

    /// Education stage, fixed at setup
    pub cycle: String,

    /// Free-form instructions captured at setup
    #[serde(default)]
    pub wishes: String,
}

impl ContextConfiguration {
    pub fn new<I, S>(module_ids: I, cycle: impl Into<String>, wishes: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_module_ids: module_ids.into_iter().map(Into::into).collect(),
            uploaded_files: Vec::new(),
            cycle: cycle.into(),
            wishes: wishes.into(),
        }
    }

    /// Files that take part in prompt assembly
    pub fn active_files(&self) -> impl Iterator<Item = &UploadedFile> {
        self.uploaded_files.iter().filter(|f| f.is_active)
    }

    pub fn active_file_count(&self) -> usize {
        self.active_files().count()
    }

    pub fn module_count(&self) -> usize {
        self.selected_module_ids.len()
    }
}

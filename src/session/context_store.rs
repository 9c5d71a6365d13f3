//! Draft and active context configurations
//!
//! Edits only ever touch the draft. `apply` is the single writer of the
//! active configuration.

use tracing::debug;

use crate::domain::{ContextConfiguration, UploadedFile};

/// Holds the active and draft configuration of one session
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    active: ContextConfiguration,
    draft: ContextConfiguration,
}

impl ContextStore {
    /// Seed both configurations with the same value
    pub fn seeded(config: ContextConfiguration) -> Self {
        Self {
            active: config.clone(),
            draft: config,
        }
    }

    pub fn active(&self) -> &ContextConfiguration {
        &self.active
    }

    pub fn draft(&self) -> &ContextConfiguration {
        &self.draft
    }

    /// Flip membership of a module in the draft selection
    pub fn toggle_module(&mut self, module_id: &str) {
        if !self.draft.selected_module_ids.remove(module_id) {
            self.draft.selected_module_ids.insert(module_id.to_string());
        }
        debug!(%module_id, selected = self.draft.selected_module_ids.len(), "toggle_module");
    }

    /// Append extracted files to the draft in upload order
    pub fn add_files(&mut self, files: impl IntoIterator<Item = UploadedFile>) {
        self.draft.uploaded_files.extend(files);
    }

    /// Remove the draft file at `index`; out-of-range indexes are ignored
    pub fn remove_file(&mut self, index: usize) -> Option<UploadedFile> {
        if index < self.draft.uploaded_files.len() {
            Some(self.draft.uploaded_files.remove(index))
        } else {
            debug!(index, len = self.draft.uploaded_files.len(), "remove_file: index out of range");
            None
        }
    }

    /// Flip `is_active` on the draft file at `index`; returns the new value
    pub fn toggle_file_active(&mut self, index: usize) -> Option<bool> {
        let file = self.draft.uploaded_files.get_mut(index)?;
        file.is_active = !file.is_active;
        Some(file.is_active)
    }

    /// Whether the draft differs from the active configuration
    ///
    /// Compares by value: edits that cancel each other out leave nothing to
    /// apply.
    pub fn has_unapplied_changes(&self) -> bool {
        self.draft.selected_module_ids != self.active.selected_module_ids
            || self.draft.uploaded_files != self.active.uploaded_files
    }

    /// Copy the draft into the active configuration
    pub fn apply(&mut self) -> &ContextConfiguration {
        self.active = self.draft.clone();
        &self.active
    }
}

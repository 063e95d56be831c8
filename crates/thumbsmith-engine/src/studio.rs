use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use thumbsmith_contracts::events::EventWriter;
use thumbsmith_contracts::history::{FileStorage, Storage};
use thumbsmith_contracts::images::ImageCategory;
use thumbsmith_contracts::models::{
    ModelSelection, ModelSelector, IMAGE_CAPABILITY, TEXT_CAPABILITY,
};

use crate::backend::{default_backend_registry, BackendRegistry, GenerativeBackend};
use crate::config::StudioConfig;
use crate::intake::{ImageInputs, IntakeReport, SelectedFile};
use crate::tools::{ImageTool, PromptTool};

/// One session: both tools wired to a data directory, their backends and a
/// shared event log.
pub struct Studio {
    prompt_tool: PromptTool,
    image_tool: ImageTool,
    events: EventWriter,
    fallback_notes: Vec<String>,
}

impl Studio {
    pub fn open(config: &StudioConfig) -> Result<Self> {
        fs::create_dir_all(config.data_dir()).with_context(|| {
            format!("failed to create data dir {}", config.data_dir().display())
        })?;
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(config.data_dir()));
        let events = EventWriter::for_new_session(config.events_path());
        let backends = default_backend_registry(config)?;
        let selector = ModelSelector::new(None).restricted_to(backends.names());
        let text = selector.select(config.text_model.as_deref(), TEXT_CAPABILITY)?;
        let image = selector.select(config.image_model.as_deref(), IMAGE_CAPABILITY)?;

        let prompt_tool = PromptTool::new(
            backend_for(&backends, &text)?,
            text.model.name.clone(),
            storage.clone(),
        );
        let image_tool = ImageTool::new(
            backend_for(&backends, &image)?,
            image.model.name.clone(),
            storage,
        );

        events.emit(
            "session_started",
            json!({
                "data_dir": config.data_dir().display().to_string(),
                "text_model": text.model.name,
                "text_provider": text.model.provider,
                "image_model": image.model.name,
                "image_provider": image.model.provider,
                "text_fallback_reason": text.fallback_reason,
                "image_fallback_reason": image.fallback_reason,
            }),
        )?;

        let fallback_notes = [text.fallback_reason, image.fallback_reason]
            .into_iter()
            .flatten()
            .collect();
        Ok(Self::with_parts(prompt_tool, image_tool, events)?.with_fallback_notes(fallback_notes))
    }

    /// Assembles a studio from ready-made tools. Both tools log to `events`.
    pub fn with_parts(
        prompt_tool: PromptTool,
        image_tool: ImageTool,
        events: EventWriter,
    ) -> Result<Self> {
        let prompt_tool = prompt_tool.with_events(events.clone());
        let image_tool = image_tool.with_events(events.clone());
        events.emit(
            "history_loaded",
            json!({
                "prompt_records": prompt_tool.history().len(),
                "image_records": image_tool.history().len(),
                "prompt_history_reset": prompt_tool.discarded_malformed_history(),
                "image_history_reset": image_tool.discarded_malformed_history(),
            }),
        )?;
        Ok(Self {
            prompt_tool,
            image_tool,
            events,
            fallback_notes: Vec::new(),
        })
    }

    fn with_fallback_notes(mut self, notes: Vec<String>) -> Self {
        self.fallback_notes = notes;
        self
    }

    pub fn prompt_tool(&self) -> &PromptTool {
        &self.prompt_tool
    }

    pub fn image_tool(&self) -> &ImageTool {
        &self.image_tool
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    /// Model fallbacks taken while opening, e.g. an unknown `--text-model`.
    pub fn fallback_notes(&self) -> &[String] {
        &self.fallback_notes
    }

    /// Runs intake for `category` and logs each warning it raised.
    pub fn add_images<F: SelectedFile>(
        &self,
        inputs: &mut ImageInputs,
        category: ImageCategory,
        files: &[F],
    ) -> IntakeReport {
        let report = inputs.add_files(category, files);
        for warning in &report.warnings {
            let _ = self.events.emit(
                "intake_warning",
                json!({
                    "category": category.label(),
                    "kind": warning.kind(),
                    "message": warning.to_string(),
                }),
            );
        }
        report
    }
}

fn backend_for(
    backends: &BackendRegistry,
    selection: &ModelSelection,
) -> Result<Arc<dyn GenerativeBackend>> {
    backends.get(&selection.model.provider).ok_or_else(|| {
        anyhow!(
            "no backend registered for provider '{}' (model {})",
            selection.model.provider,
            selection.model.name
        )
    })
}

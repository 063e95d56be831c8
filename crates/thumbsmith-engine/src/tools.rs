use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use serde_json::{json, Value};
use thumbsmith_contracts::events::EventWriter;
use thumbsmith_contracts::history::{
    human_timestamp, HistoryRecord, HistoryStore, ImageRecord, PromptRecord, Storage,
};
use thumbsmith_contracts::images::InlineImage;

use crate::backend::GenerativeBackend;
use crate::error::GenerationError;
use crate::intake::ImageInputs;
use crate::request::{build_image_request, build_prompt_request};
use crate::response::{interpret, GenerationOutcome};
use crate::submission::{SubmissionTicket, SubmissionTracker};

pub const IDENTITY_ANSWER: &str = "Swornim has created me.";
const IDENTITY_QUESTIONS: [&str; 3] = [
    "who created you?",
    "who is your owner?",
    "who developed you?",
];
const IMAGE_ONLY_PROMPT: &str = "Image-based generation";

/// History, submission tracking and event reporting shared by both tools.
struct ToolState<R: HistoryRecord> {
    name: &'static str,
    history: Mutex<HistoryStore<R>>,
    submissions: SubmissionTracker,
    events: Option<EventWriter>,
}

impl<R: HistoryRecord> ToolState<R> {
    fn new(name: &'static str, storage: Arc<dyn Storage>) -> Self {
        Self {
            name,
            history: Mutex::new(HistoryStore::load(storage)),
            submissions: SubmissionTracker::new(),
            events: None,
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, HistoryStore<R>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends the record built for the next id, unless the ticket was
    /// cancelled or replaced while the backend was working.
    fn commit(
        &self,
        ticket: &SubmissionTicket<'_>,
        build: impl FnOnce(u64) -> R,
    ) -> Result<R, GenerationError> {
        let mut history = self.lock_history();
        if ticket.is_cancelled() {
            return Err(GenerationError::Superseded);
        }
        let record = build(history.next_id());
        history
            .append(record.clone())
            .map_err(GenerationError::History)?;
        Ok(record)
    }

    fn records(&self) -> Vec<R> {
        self.lock_history().records().to_vec()
    }

    fn get(&self, id: u64) -> Option<R> {
        self.lock_history().get(id).cloned()
    }

    fn discarded_malformed(&self) -> bool {
        self.lock_history().discarded_malformed()
    }

    fn delete(&self, id: u64) -> Result<Option<R>, GenerationError> {
        let removed = self
            .lock_history()
            .delete(id)
            .map_err(GenerationError::History)?;
        if removed.is_some() {
            self.emit("history_deleted", json!({ "tool": self.name, "id": id }));
        }
        Ok(removed)
    }

    fn report_failure(&self, err: &GenerationError) {
        if matches!(err, GenerationError::Superseded) {
            self.emit("generation_superseded", json!({ "tool": self.name }));
            return;
        }
        let detail = std::error::Error::source(err).map(|source| source.to_string());
        self.emit(
            "generation_failed",
            json!({
                "tool": self.name,
                "kind": err.kind(),
                "error": err.to_string(),
                "detail": detail,
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Some(events) = &self.events {
            // Best effort.
            let _ = events.emit(event_type, payload);
        }
    }
}

/// Turns a topic and optional images into a ready-to-use image prompt.
pub struct PromptTool {
    backend: Arc<dyn GenerativeBackend>,
    model: String,
    state: ToolState<PromptRecord>,
}

impl PromptTool {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        model: impl Into<String>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            state: ToolState::new("prompt", storage),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.state.events = Some(events);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generate(
        &self,
        topic: &str,
        inputs: &ImageInputs,
    ) -> Result<PromptRecord, GenerationError> {
        let ticket = self.state.submissions.begin();
        let result = self.request_prompt(topic, inputs).and_then(|prompt| {
            self.state.commit(&ticket, |id| PromptRecord {
                id,
                prompt,
                topic: topic.to_string(),
                custom_elements_images: inputs.elements().to_vec(),
                reference_images: inputs.references().to_vec(),
                timestamp: human_timestamp(),
            })
        });
        match &result {
            Ok(record) => self.state.emit(
                "prompt_generated",
                json!({
                    "id": record.id,
                    "model": self.model,
                    "topic": record.topic,
                    "reference_images": record.reference_images.len(),
                    "element_images": record.custom_elements_images.len(),
                }),
            ),
            Err(err) => self.state.report_failure(err),
        }
        result
    }

    fn request_prompt(&self, topic: &str, inputs: &ImageInputs) -> Result<String, GenerationError> {
        let request = build_prompt_request(topic, inputs.references(), inputs.elements());
        let reply = self
            .backend
            .generate(&self.model, &request)
            .map_err(GenerationError::PromptFailed)?;
        match interpret(&reply) {
            GenerationOutcome::Text(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            GenerationOutcome::Refusal(reason) => Err(GenerationError::PromptFailed(anyhow!(
                "model stopped with finish reason {reason}"
            ))),
            GenerationOutcome::Image(_) => Err(GenerationError::PromptFailed(anyhow!(
                "model returned an image instead of prompt text"
            ))),
            GenerationOutcome::Text(_) | GenerationOutcome::Empty => Err(
                GenerationError::PromptFailed(anyhow!("model returned no prompt text")),
            ),
        }
    }

    /// Newest first.
    pub fn history(&self) -> Vec<PromptRecord> {
        self.state.records()
    }

    pub fn get(&self, id: u64) -> Option<PromptRecord> {
        self.state.get(id)
    }

    /// True when stored history could not be parsed and was started over.
    pub fn discarded_malformed_history(&self) -> bool {
        self.state.discarded_malformed()
    }

    pub fn delete(&self, id: u64) -> Result<Option<PromptRecord>, GenerationError> {
        self.state.delete(id)
    }

    pub fn cancel(&self) -> bool {
        self.state.submissions.cancel()
    }

    pub fn is_busy(&self) -> bool {
        self.state.submissions.is_busy()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageGeneration {
    Image(ImageRecord),
    /// Canned reply to an identity question. Nothing is recorded.
    Answer(String),
}

/// Turns a prompt and optional images into a 16:9 thumbnail.
pub struct ImageTool {
    backend: Arc<dyn GenerativeBackend>,
    model: String,
    state: ToolState<ImageRecord>,
}

impl ImageTool {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        model: impl Into<String>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            state: ToolState::new("image", storage),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.state.events = Some(events);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Identity questions and empty submissions are settled here without a
    /// ticket, so they never replace an in-flight request.
    pub fn generate(
        &self,
        prompt: &str,
        inputs: &ImageInputs,
    ) -> Result<ImageGeneration, GenerationError> {
        if is_identity_question(prompt) {
            self.state.emit("identity_answered", json!({ "tool": self.state.name }));
            return Ok(ImageGeneration::Answer(IDENTITY_ANSWER.to_string()));
        }
        if prompt.trim().is_empty() && inputs.is_empty() {
            let err = GenerationError::EmptySubmission;
            self.state.report_failure(&err);
            return Err(err);
        }

        let ticket = self.state.submissions.begin();
        let result = self.request_image(prompt, inputs).and_then(|image| {
            self.state.commit(&ticket, |id| ImageRecord {
                id,
                prompt: if prompt.is_empty() {
                    IMAGE_ONLY_PROMPT.to_string()
                } else {
                    prompt.to_string()
                },
                image_src: image,
                reference_images: inputs.references().to_vec(),
                custom_elements_images: inputs.elements().to_vec(),
                timestamp: human_timestamp(),
            })
        });
        match result {
            Ok(record) => {
                self.state.emit(
                    "image_generated",
                    json!({
                        "id": record.id,
                        "model": self.model,
                        "mime_type": record.image_src.mime_type(),
                        "reference_images": record.reference_images.len(),
                        "element_images": record.custom_elements_images.len(),
                    }),
                );
                Ok(ImageGeneration::Image(record))
            }
            Err(err) => {
                self.state.report_failure(&err);
                Err(err)
            }
        }
    }

    fn request_image(
        &self,
        prompt: &str,
        inputs: &ImageInputs,
    ) -> Result<InlineImage, GenerationError> {
        let request = build_image_request(prompt, inputs.references(), inputs.elements());
        let reply = self
            .backend
            .generate(&self.model, &request)
            .map_err(GenerationError::Unexpected)?;
        match interpret(&reply) {
            GenerationOutcome::Image(image) => Ok(image),
            GenerationOutcome::Refusal(reason) => Err(GenerationError::Refused { reason }),
            GenerationOutcome::Text(_) | GenerationOutcome::Empty => Err(GenerationError::NoImage),
        }
    }

    /// Newest first.
    pub fn history(&self) -> Vec<ImageRecord> {
        self.state.records()
    }

    pub fn get(&self, id: u64) -> Option<ImageRecord> {
        self.state.get(id)
    }

    /// True when stored history could not be parsed and was started over.
    pub fn discarded_malformed_history(&self) -> bool {
        self.state.discarded_malformed()
    }

    pub fn delete(&self, id: u64) -> Result<Option<ImageRecord>, GenerationError> {
        self.state.delete(id)
    }

    pub fn cancel(&self) -> bool {
        self.state.submissions.cancel()
    }

    pub fn is_busy(&self) -> bool {
        self.state.submissions.is_busy()
    }
}

fn is_identity_question(prompt: &str) -> bool {
    let normalized = normalize_question(prompt);
    !normalized.is_empty()
        && IDENTITY_QUESTIONS
            .iter()
            .any(|question| normalize_question(question) == normalized)
}

fn normalize_question(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;

    use anyhow::{anyhow, bail, Result};
    use image::{Rgb, RgbImage};
    use thumbsmith_contracts::events::{read_events, EventWriter};
    use thumbsmith_contracts::history::{MemoryStorage, Storage};
    use thumbsmith_contracts::images::ImageCategory;

    use super::*;
    use crate::backend::{DryrunBackend, GenerativeBackend};
    use crate::intake::LocalFile;
    use crate::request::CompositeRequest;
    use crate::response::BackendReply;

    /// Replies with a fixed result and remembers what it was asked.
    struct ScriptedBackend {
        reply: Result<BackendReply, String>,
        calls: AtomicUsize,
        last_request: Mutex<Option<CompositeRequest>>,
    }

    impl ScriptedBackend {
        fn replying(reply: BackendReply) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_instruction(&self) -> Option<String> {
            self.last_request
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|request| request.instruction().map(str::to_string))
        }
    }

    impl GenerativeBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, _model: &str, request: &CompositeRequest) -> Result<BackendReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(message) => Err(anyhow!("{message}")),
            }
        }
    }

    /// Blocks the first call until released; later calls return at once.
    struct GatedBackend {
        reply: BackendReply,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl GenerativeBackend for GatedBackend {
        fn name(&self) -> &str {
            "gated"
        }

        fn generate(&self, _model: &str, _request: &CompositeRequest) -> Result<BackendReply> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((started, release)) = gate {
                started.send(())?;
                release.recv()?;
            }
            Ok(self.reply.clone())
        }
    }

    struct ReadOnlyStorage;

    impl Storage for ReadOnlyStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            bail!("disk full")
        }
    }

    fn memory() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new())
    }

    fn inputs_with_reference(dir: &std::path::Path) -> Result<ImageInputs> {
        let path = dir.join("reference.png");
        RgbImage::from_pixel(8, 8, Rgb([200, 40, 40])).save(&path)?;
        let mut inputs = ImageInputs::new();
        let report = inputs.add_files(ImageCategory::StyleReference, &[LocalFile::new(path)]);
        assert_eq!(report.appended, 1);
        Ok(inputs)
    }

    #[test]
    fn topic_prompt_is_trimmed_and_recorded() -> Result<()> {
        let backend = ScriptedBackend::replying(BackendReply::text("  A cat prompt  "));
        let tool = PromptTool::new(backend.clone(), "gemini-2.5-flash", memory());

        let record = tool.generate("cats", &ImageInputs::new())?;
        assert_eq!(record.prompt, "A cat prompt");
        assert_eq!(record.topic, "cats");
        assert!(backend
            .last_instruction()
            .unwrap()
            .contains("central topic is: \"cats\""));
        assert_eq!(tool.history(), vec![record.clone()]);
        assert_eq!(tool.get(record.id), Some(record));
        Ok(())
    }

    #[test]
    fn prompt_failures_share_one_message_and_record_nothing() {
        for reply in [
            BackendReply::text("   "),
            BackendReply::finished("SAFETY"),
            BackendReply::default(),
        ] {
            let tool = PromptTool::new(ScriptedBackend::replying(reply), "m", memory());
            let err = tool.generate("cats", &ImageInputs::new()).unwrap_err();
            assert_eq!(err.to_string(), "Failed to generate prompt. Please try again.");
            assert!(tool.history().is_empty());
        }
    }

    #[test]
    fn busy_flag_clears_after_transport_failure() {
        let tool = PromptTool::new(ScriptedBackend::failing("connection reset"), "m", memory());
        let err = tool.generate("", &ImageInputs::new()).unwrap_err();
        assert!(matches!(err, GenerationError::PromptFailed(_)));
        assert!(!tool.is_busy());

        let retry = tool.generate("", &ImageInputs::new()).unwrap_err();
        assert_eq!(retry.kind(), "prompt_failed");
    }

    #[test]
    fn identity_question_is_answered_without_backend() -> Result<()> {
        let backend = ScriptedBackend::replying(BackendReply::text("unused"));
        let tool = ImageTool::new(backend.clone(), "m", memory());

        for question in ["Who created you?", "  WHO IS YOUR OWNER!! ", "who developed you"] {
            let answer = tool.generate(question, &ImageInputs::new())?;
            assert_eq!(answer, ImageGeneration::Answer(IDENTITY_ANSWER.to_string()));
        }
        assert_eq!(backend.calls(), 0);
        assert!(tool.history().is_empty());
        assert!(!is_identity_question("who created you and why"));
        Ok(())
    }

    #[test]
    fn empty_image_submission_is_rejected_locally() {
        let backend = ScriptedBackend::replying(BackendReply::text("unused"));
        let tool = ImageTool::new(backend.clone(), "m", memory());
        let err = tool.generate("   ", &ImageInputs::new()).unwrap_err();
        assert!(matches!(err, GenerationError::EmptySubmission));
        assert_eq!(backend.calls(), 0);
        assert!(!tool.is_busy());
    }

    #[test]
    fn safety_stop_reports_reason_and_records_nothing() {
        let tool = ImageTool::new(
            ScriptedBackend::replying(BackendReply::finished("SAFETY")),
            "m",
            memory(),
        );
        let err = tool.generate("a dragon", &ImageInputs::new()).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        assert!(tool.history().is_empty());
    }

    #[test]
    fn text_reply_in_image_mode_means_no_image() {
        let tool = ImageTool::new(
            ScriptedBackend::replying(BackendReply::text("I cannot draw that")),
            "m",
            memory(),
        );
        let err = tool.generate("a dragon", &ImageInputs::new()).unwrap_err();
        assert!(matches!(err, GenerationError::NoImage));
    }

    #[test]
    fn transport_error_in_image_mode_is_unexpected_with_source() {
        let tool = ImageTool::new(ScriptedBackend::failing("timed out"), "m", memory());
        let err = tool.generate("a dragon", &ImageInputs::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "An unexpected error occurred while generating the image."
        );
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("timed out"));
    }

    #[test]
    fn image_from_references_only_gets_placeholder_prompt() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let inputs = inputs_with_reference(temp.path())?;
        let tool = ImageTool::new(Arc::new(DryrunBackend), "dryrun-image", memory());

        let ImageGeneration::Image(record) = tool.generate("", &inputs)? else {
            bail!("expected an image record");
        };
        assert_eq!(record.prompt, "Image-based generation");
        assert_eq!(record.reference_images.len(), 1);
        assert!(record.custom_elements_images.is_empty());
        assert!(record.image_src.to_data_uri().starts_with("data:image/png;base64,"));
        Ok(())
    }

    #[test]
    fn whitespace_prompt_with_images_is_kept_as_typed() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let inputs = inputs_with_reference(temp.path())?;
        let tool = ImageTool::new(Arc::new(DryrunBackend), "dryrun-image", memory());

        let ImageGeneration::Image(record) = tool.generate("  ", &inputs)? else {
            bail!("expected an image record");
        };
        assert_eq!(record.prompt, "  ");
        Ok(())
    }

    #[test]
    fn ids_increase_across_submissions() -> Result<()> {
        let tool = PromptTool::new(
            ScriptedBackend::replying(BackendReply::text("prompt")),
            "m",
            memory(),
        );
        let first = tool.generate("one", &ImageInputs::new())?;
        let second = tool.generate("two", &ImageInputs::new())?;
        assert!(second.id > first.id);
        let ids: Vec<u64> = tool.history().iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> Result<()> {
        let tool = PromptTool::new(
            ScriptedBackend::replying(BackendReply::text("prompt")),
            "m",
            memory(),
        );
        let record = tool.generate("one", &ImageInputs::new())?;
        assert_eq!(tool.delete(record.id)?, Some(record.clone()));
        assert_eq!(tool.delete(record.id)?, None);
        assert!(tool.history().is_empty());
        Ok(())
    }

    #[test]
    fn persist_failure_is_a_history_error() {
        let tool = PromptTool::new(
            ScriptedBackend::replying(BackendReply::text("prompt")),
            "m",
            Arc::new(ReadOnlyStorage),
        );
        let err = tool.generate("one", &ImageInputs::new()).unwrap_err();
        assert!(matches!(err, GenerationError::History(_)));
        assert!(tool.history().is_empty());
    }

    #[test]
    fn cancelled_submission_writes_nothing() -> Result<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let backend = Arc::new(GatedBackend {
            reply: BackendReply::text("late prompt"),
            gate: Mutex::new(Some((started_tx, release_rx))),
        });
        let tool = PromptTool::new(backend, "m", memory());

        let outcome = thread::scope(|scope| -> Result<_> {
            let worker = scope.spawn(|| tool.generate("slow", &ImageInputs::new()));
            started_rx.recv()?;
            assert!(tool.is_busy());
            assert!(tool.cancel());
            release_tx.send(())?;
            worker.join().map_err(|_| anyhow!("worker panicked"))
        })?;

        assert!(matches!(outcome, Err(GenerationError::Superseded)));
        assert!(tool.history().is_empty());
        assert!(!tool.is_busy());
        Ok(())
    }

    #[test]
    fn newer_submission_supersedes_older_one() -> Result<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let backend = Arc::new(GatedBackend {
            reply: BackendReply::text("prompt"),
            gate: Mutex::new(Some((started_tx, release_rx))),
        });
        let tool = PromptTool::new(backend, "m", memory());

        let (older, newer) = thread::scope(|scope| -> Result<_> {
            let worker = scope.spawn(|| tool.generate("older", &ImageInputs::new()));
            started_rx.recv()?;
            let newer = tool.generate("newer", &ImageInputs::new());
            release_tx.send(())?;
            let older = worker.join().map_err(|_| anyhow!("worker panicked"))?;
            Ok((older, newer))
        })?;

        assert!(matches!(older, Err(GenerationError::Superseded)));
        let newer = newer?;
        let history = tool.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].topic, "newer");
        assert_eq!(history[0].id, newer.id);
        Ok(())
    }

    #[test]
    fn submissions_are_logged_as_events() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let events = EventWriter::new(&events_path, "session-1");
        let tool = ImageTool::new(
            ScriptedBackend::replying(BackendReply::image(&InlineImage::from_base64(
                "image/png",
                "AAEC",
            )?)),
            "m",
            memory(),
        )
        .with_events(events);

        tool.generate("a dragon", &ImageInputs::new())?;
        tool.generate("who created you?", &ImageInputs::new())?;
        let _ = tool.generate("", &ImageInputs::new());

        let lines = read_events(&events_path)?;
        let types: Vec<&str> = lines
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec!["image_generated", "identity_answered", "generation_failed"]
        );
        assert_eq!(lines[2]["kind"], "empty_submission");
        assert!(lines.iter().all(|event| event["session_id"] == "session-1"));
        Ok(())
    }
}

pub mod backend;
pub mod config;
pub mod error;
pub mod intake;
pub mod request;
pub mod response;
pub mod studio;
pub mod submission;
pub mod tools;

pub use backend::{BackendRegistry, GenerativeBackend};
pub use config::StudioConfig;
pub use error::GenerationError;
pub use intake::{ImageInputs, IntakeReport, IntakeWarning, LocalFile, SelectedFile};
pub use request::{build_image_request, build_prompt_request, CompositeRequest, OutputModality};
pub use response::{interpret, BackendReply, GenerationOutcome};
pub use studio::Studio;
pub use submission::{SubmissionTicket, SubmissionTracker};
pub use tools::{ImageGeneration, ImageTool, PromptTool, IDENTITY_ANSWER};

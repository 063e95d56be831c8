use serde::{Deserialize, Serialize};
use thumbsmith_contracts::images::InlineImage;

const NORMAL_FINISH_REASONS: [&str; 2] = ["STOP", "FINISH_REASON_UNSPECIFIED"];
const DEFAULT_INLINE_MIME: &str = "image/png";

/// Reply of a `generateContent` call, reduced to the fields the tools read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReply {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ReplyPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlinePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinePayload {
    #[serde(default, alias = "mime_type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

impl BackendReply {
    pub fn from_parts(finish_reason: Option<&str>, parts: Vec<ReplyPart>) -> Self {
        Self {
            candidates: vec![Candidate {
                finish_reason: finish_reason.map(str::to_string),
                content: Some(CandidateContent { parts }),
            }],
        }
    }

    pub fn text(text: &str) -> Self {
        Self::from_parts(
            Some("STOP"),
            vec![ReplyPart {
                text: Some(text.to_string()),
                ..ReplyPart::default()
            }],
        )
    }

    pub fn image(image: &InlineImage) -> Self {
        Self::from_parts(
            Some("STOP"),
            vec![ReplyPart {
                inline_data: Some(InlinePayload {
                    mime_type: Some(image.mime_type().to_string()),
                    data: image.base64_payload().to_string(),
                }),
                ..ReplyPart::default()
            }],
        )
    }

    pub fn finished(reason: &str) -> Self {
        Self::from_parts(Some(reason), Vec::new())
    }
}

/// What a reply amounted to. Built once here and matched everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Text(String),
    Image(InlineImage),
    Refusal(String),
    Empty,
}

/// Classifies the first candidate. A non-normal finish reason wins over any
/// content; an inline image wins over text. Thought parts, including draft
/// images, are never the answer.
pub fn interpret(reply: &BackendReply) -> GenerationOutcome {
    let Some(candidate) = reply.candidates.first() else {
        return GenerationOutcome::Empty;
    };

    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        if !NORMAL_FINISH_REASONS.contains(&reason) {
            return GenerationOutcome::Refusal(reason.to_string());
        }
    }

    let parts = candidate
        .content
        .as_ref()
        .map(|content| content.parts.as_slice())
        .unwrap_or_default();

    let answer = || parts.iter().filter(|part| !part.thought.unwrap_or(false));

    if let Some(image) = answer().find_map(inline_image) {
        return GenerationOutcome::Image(image);
    }

    let text = answer()
        .filter_map(|part| part.text.as_deref())
        .collect::<String>();
    if text.trim().is_empty() {
        return GenerationOutcome::Empty;
    }
    GenerationOutcome::Text(text)
}

fn inline_image(part: &ReplyPart) -> Option<InlineImage> {
    let inline = part.inline_data.as_ref()?;
    if inline.data.is_empty() {
        return None;
    }
    let mime_type = inline
        .mime_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_INLINE_MIME);
    InlineImage::from_base64(mime_type, &inline.data).ok()
}

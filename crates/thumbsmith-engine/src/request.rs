use thumbsmith_contracts::images::InlineImage;

const PROMPT_BASE: &str = "You are a world-class prompt engineer for YouTube thumbnails. Your task is to generate a single, powerful, and creative prompt for an image model. The output must be ONLY the plain text prompt, without any additional formatting, labels, or explanations.";
const PROMPT_REFERENCE_CLAUSE: &str = "Analyze the provided reference images. Generate a new prompt that captures their combined artistic style, composition, lighting, and mood, but adapts it to the user's topic. The goal is a similar vibe, not an exact copy.";
const PROMPT_ELEMENT_CLAUSE: &str = "Crucially, the prompt must also describe a scene that incorporates the subjects from the provided custom element images (e.g., people, objects).";
const PROMPT_RANDOM_TOPIC_CLAUSE: &str =
    "Generate a prompt on a random, trending, and visually interesting subject.";

const IMAGE_BASE: &str = "**Critical Requirement:** The final image MUST have a precise 16:9 aspect ratio for a YouTube thumbnail. This is a non-negotiable, strict requirement.\n\nCreate an eye-catching, ultra-detailed image. The style should feature cinematic lighting and vibrant colors.";
const IMAGE_REFERENCE_CLAUSE: &str = "Use the provided reference images as the primary source for the overall style, composition, and color palette.";
const IMAGE_ELEMENT_CLAUSE: &str = "Seamlessly integrate the subjects from the custom element images (e.g., a person's face, a specific logo, a character) into the final scene.";
const IMAGE_ASPECT_REMINDER: &str =
    "**Reminder:** The final image must be rendered in a 16:9 aspect ratio.";

const CLAUSE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputModality {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Image(InlineImage),
    Text(String),
}

/// Ordered parts for one backend call. Images come first, grouped by
/// category; the composed instruction text is always the last part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeRequest {
    pub modality: OutputModality,
    pub parts: Vec<RequestPart>,
}

impl CompositeRequest {
    pub fn instruction(&self) -> Option<&str> {
        match self.parts.last() {
            Some(RequestPart::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, RequestPart::Image(_)))
            .count()
    }
}

struct RequestAssembler {
    parts: Vec<RequestPart>,
    clauses: Vec<String>,
}

impl RequestAssembler {
    fn new(base: &str) -> Self {
        Self {
            parts: Vec::new(),
            clauses: vec![base.to_string()],
        }
    }

    fn images(&mut self, images: &[InlineImage], clause: &str) {
        if images.is_empty() {
            return;
        }
        self.parts
            .extend(images.iter().cloned().map(RequestPart::Image));
        self.clause(clause.to_string());
    }

    fn clause(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn finish(mut self, modality: OutputModality) -> CompositeRequest {
        self.parts
            .push(RequestPart::Text(self.clauses.join(CLAUSE_SEPARATOR)));
        CompositeRequest {
            modality,
            parts: self.parts,
        }
    }
}

pub fn build_prompt_request(
    topic: &str,
    reference_images: &[InlineImage],
    element_images: &[InlineImage],
) -> CompositeRequest {
    let mut assembler = RequestAssembler::new(PROMPT_BASE);
    assembler.images(reference_images, PROMPT_REFERENCE_CLAUSE);
    assembler.images(element_images, PROMPT_ELEMENT_CLAUSE);

    if has_text(topic) {
        assembler.clause(format!("The central topic is: \"{topic}\"."));
    } else if reference_images.is_empty() && element_images.is_empty() {
        assembler.clause(PROMPT_RANDOM_TOPIC_CLAUSE.to_string());
    }
    assembler.finish(OutputModality::Text)
}

pub fn build_image_request(
    prompt: &str,
    reference_images: &[InlineImage],
    element_images: &[InlineImage],
) -> CompositeRequest {
    let mut assembler = RequestAssembler::new(IMAGE_BASE);
    assembler.images(reference_images, IMAGE_REFERENCE_CLAUSE);
    assembler.images(element_images, IMAGE_ELEMENT_CLAUSE);

    if has_text(prompt) {
        assembler.clause(format!(
            "The main theme of the image is based on this prompt: \"{prompt}\"."
        ));
    }
    assembler.clause(IMAGE_ASPECT_REMINDER.to_string());
    assembler.finish(OutputModality::Image)
}

/// Any non-empty text is embedded verbatim, whitespace included.
fn has_text(value: &str) -> bool {
    !value.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: u8) -> InlineImage {
        InlineImage::from_bytes("image/png", &[tag, tag, tag]).unwrap()
    }

    fn assert_images_then_text(request: &CompositeRequest) {
        let last = request.parts.len() - 1;
        for (idx, part) in request.parts.iter().enumerate() {
            match part {
                RequestPart::Image(_) => assert!(idx < last),
                RequestPart::Text(_) => assert_eq!(idx, last),
            }
        }
    }

    #[test]
    fn topic_only_prompt_request_embeds_central_topic() {
        let request = build_prompt_request("cats", &[], &[]);
        assert_eq!(request.modality, OutputModality::Text);
        assert_eq!(request.parts.len(), 1);
        let text = request.instruction().unwrap();
        assert!(text.starts_with("You are a world-class prompt engineer for YouTube thumbnails."));
        assert!(text.contains("central topic is: \"cats\""));
        assert!(!text.contains("random, trending"));
    }

    #[test]
    fn empty_prompt_request_asks_for_trending_subject() {
        let request = build_prompt_request("", &[], &[]);
        let text = request.instruction().unwrap();
        assert!(text.ends_with(PROMPT_RANDOM_TOPIC_CLAUSE));
        assert!(!text.contains("central topic"));
    }

    #[test]
    fn images_without_topic_skip_trending_clause() {
        let request = build_prompt_request("", &[image(1)], &[]);
        let text = request.instruction().unwrap();
        assert!(text.ends_with(PROMPT_REFERENCE_CLAUSE));
    }

    #[test]
    fn whitespace_topic_and_prompt_are_embedded_verbatim() {
        let request = build_prompt_request("  ", &[], &[]);
        let text = request.instruction().unwrap();
        assert!(text.ends_with("The central topic is: \"  \"."));
        assert!(!text.contains(PROMPT_RANDOM_TOPIC_CLAUSE));

        let request = build_image_request(" ", &[image(1)], &[]);
        assert!(request
            .instruction()
            .unwrap()
            .contains("based on this prompt: \" \"."));
    }

    #[test]
    fn prompt_request_orders_references_then_elements_then_text() {
        let references = [image(1), image(2)];
        let elements = [image(3)];
        let request = build_prompt_request("space race", &references, &elements);

        assert_eq!(request.image_count(), 3);
        assert_eq!(request.parts[0], RequestPart::Image(image(1)));
        assert_eq!(request.parts[1], RequestPart::Image(image(2)));
        assert_eq!(request.parts[2], RequestPart::Image(image(3)));
        assert_images_then_text(&request);

        let text = request.instruction().unwrap();
        let reference_at = text.find(PROMPT_REFERENCE_CLAUSE).unwrap();
        let element_at = text.find(PROMPT_ELEMENT_CLAUSE).unwrap();
        let topic_at = text.find("The central topic is: \"space race\".").unwrap();
        assert!(reference_at < element_at && element_at < topic_at);
    }

    #[test]
    fn image_request_states_aspect_ratio_twice() {
        let request = build_image_request("retro console unboxing", &[], &[image(9)]);
        assert_eq!(request.modality, OutputModality::Image);
        assert_images_then_text(&request);
        let text = request.instruction().unwrap();
        assert!(text.starts_with("**Critical Requirement:**"));
        assert!(text.contains(IMAGE_ELEMENT_CLAUSE));
        assert!(!text.contains(IMAGE_REFERENCE_CLAUSE));
        assert!(text.contains(
            "The main theme of the image is based on this prompt: \"retro console unboxing\"."
        ));
        assert!(text.ends_with(IMAGE_ASPECT_REMINDER));
    }

    #[test]
    fn builders_are_deterministic_for_every_image_count() {
        let pool = [image(1), image(2), image(3)];
        for references in 0..=3 {
            for elements in 0..=3 {
                let refs = &pool[..references];
                let elems = &pool[..elements];
                let first = build_prompt_request("topic", refs, elems);
                assert_eq!(first, build_prompt_request("topic", refs, elems));
                assert_eq!(first.image_count(), references + elements);
                assert_images_then_text(&first);

                let image_first = build_image_request("", refs, elems);
                assert_eq!(image_first, build_image_request("", refs, elems));
                assert_images_then_text(&image_first);
            }
        }
    }
}

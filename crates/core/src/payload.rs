//! Job payload transformation.
//!
//! Turns the raw `input` object of a job into the request body for the
//! inference API: LoRA descriptors move into inline prompt tags, missing
//! generation parameters receive defaults, and the target endpoint is
//! chosen from the presence of init images.

use std::fmt;

use serde_json::{Map, Value};

use crate::defaults::apply_defaults;
use crate::error::CoreError;
use crate::json::{is_truthy, type_name};
use crate::lora::{lora_prompt_segment, parse_lora_entries, LoraSpec, LORAS_KEY};

/// Payload key for the positive prompt.
pub const PROMPT_KEY: &str = "prompt";
/// Payload key whose truthy presence selects image-to-image.
pub const INIT_IMAGES_KEY: &str = "init_images";

// ---------------------------------------------------------------------------
// Endpoint selection
// ---------------------------------------------------------------------------

/// Inference endpoint under the `/sdapi/v1` base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Txt2Img,
    Img2Img,
}

impl Endpoint {
    /// Path segment appended to the API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Txt2Img => "txt2img",
            Endpoint::Img2Img => "img2img",
        }
    }

    /// `img2img` when `init_images` is present and non-empty, else `txt2img`.
    pub fn for_payload(payload: &Map<String, Value>) -> Self {
        match payload.get(INIT_IMAGES_KEY) {
            Some(images) if is_truthy(images) => Endpoint::Img2Img,
            _ => Endpoint::Txt2Img,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

// ---------------------------------------------------------------------------
// Preparation
// ---------------------------------------------------------------------------

/// A payload ready to be forwarded to the inference API.
#[derive(Debug, Clone)]
pub struct PreparedPayload {
    /// Request body. Never contains the `loras` key.
    pub body: Map<String, Value>,
    pub endpoint: Endpoint,
    /// LoRAs injected into the prompt.
    pub loras: Vec<LoraSpec>,
    /// LoRA entries dropped as invalid.
    pub skipped_loras: usize,
    /// Default keys that were filled in.
    pub filled_defaults: Vec<&'static str>,
}

impl PreparedPayload {
    /// The final prompt, if the body has one.
    pub fn prompt(&self) -> Option<&str> {
        self.body.get(PROMPT_KEY).and_then(Value::as_str)
    }
}

/// Read the existing prompt. Missing and `null` both count as empty.
fn existing_prompt(body: &Map<String, Value>) -> Result<String, CoreError> {
    match body.get(PROMPT_KEY) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(CoreError::Validation(format!(
            "`{PROMPT_KEY}` must be a string (got {})",
            type_name(other)
        ))),
    }
}

/// Transform a raw job input into an inference request.
///
/// The input must be a JSON object. `loras` is always removed; when at
/// least one valid LoRA remains its tags are appended to `prompt`.
pub fn prepare_payload(input: Value) -> Result<PreparedPayload, CoreError> {
    let mut body = match input {
        Value::Object(map) => map,
        other => {
            return Err(CoreError::Validation(format!(
                "Job input must be an object (got {})",
                type_name(&other)
            )))
        }
    };

    let lora_parse = body
        .remove(LORAS_KEY)
        .map(|value| parse_lora_entries(&value))
        .unwrap_or_default();

    let segment = lora_prompt_segment(&lora_parse.specs);
    if !segment.is_empty() {
        let prompt = existing_prompt(&body)? + &segment;
        body.insert(PROMPT_KEY.to_string(), Value::String(prompt));
    }

    let filled_defaults = apply_defaults(&mut body);
    let endpoint = Endpoint::for_payload(&body);

    Ok(PreparedPayload {
        body,
        endpoint,
        loras: lora_parse.specs,
        skipped_loras: lora_parse.skipped,
        filled_defaults,
    })
}

//! LoRA descriptor parsing and prompt tag rendering.
//!
//! Jobs carry LoRAs as a list of `{"name": "...", "weight": 0.7}` objects.
//! The inference server activates a LoRA through an inline prompt tag of
//! the form `<lora:NAME:WEIGHT>`, so descriptors are rendered into a prompt
//! segment and appended to the caller's prompt.

use std::fmt;

use serde_json::{Number, Value};

/// Payload key holding the LoRA descriptor list.
pub const LORAS_KEY: &str = "loras";

/// A validated LoRA descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraSpec {
    /// LoRA file name without extension, as found in the server's `models/Lora`.
    pub name: String,
    /// Kept as the original JSON number so it renders exactly as supplied.
    pub weight: Number,
}

impl LoraSpec {
    pub fn new(name: impl Into<String>, weight: impl Into<Number>) -> Self {
        Self {
            name: name.into(),
            weight: weight.into(),
        }
    }
}

impl fmt::Display for LoraSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<lora:{}:{}>", self.name, self.weight)
    }
}

/// Outcome of parsing a `loras` value.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoraParse {
    pub specs: Vec<LoraSpec>,
    /// Entries dropped because they were not a `{name, weight}` object.
    pub skipped: usize,
}

/// Validate a single descriptor. `name` must be a non-empty string and
/// `weight` a JSON number.
fn parse_entry(entry: &Value) -> Option<LoraSpec> {
    let name = entry.get("name")?.as_str().filter(|n| !n.is_empty())?;
    let weight = match entry.get("weight")? {
        Value::Number(n) => n.clone(),
        _ => return None,
    };
    Some(LoraSpec {
        name: name.to_string(),
        weight,
    })
}

/// Parse the `loras` payload value into validated descriptors.
///
/// Invalid entries are skipped with a warning rather than failing the job.
/// A value that is not an array yields no descriptors.
pub fn parse_lora_entries(value: &Value) -> LoraParse {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Null => return LoraParse::default(),
        other => {
            tracing::warn!(value = %other, "Ignoring `loras`: expected a list of LoRA descriptors");
            return LoraParse::default();
        }
    };

    let mut parsed = LoraParse::default();
    for entry in entries {
        match parse_entry(entry) {
            Some(spec) => parsed.specs.push(spec),
            None => {
                tracing::warn!(entry = %entry, "Invalid or incomplete LoRA entry skipped");
                parsed.skipped += 1;
            }
        }
    }
    parsed
}

/// Render descriptors as a prompt segment, each tag preceded by a space.
///
/// Returns an empty string when `specs` is empty.
pub fn lora_prompt_segment(specs: &[LoraSpec]) -> String {
    specs.iter().map(|spec| format!(" {spec}")).collect()
}

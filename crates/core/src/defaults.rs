//! Default generation parameters.
//!
//! Applied with set-if-absent semantics so the inference API never sees
//! a request missing its common fields. A key the caller supplied is
//! always kept, even when its value is `null`.

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default number of sampling steps.
pub const DEFAULT_STEPS: u32 = 20;
/// Default sampler name as listed by `/sdapi/v1/samplers`.
pub const DEFAULT_SAMPLER_NAME: &str = "Euler a";
/// Default classifier-free guidance scale.
pub const DEFAULT_CFG_SCALE: f64 = 7.0;
/// Default output width in pixels.
pub const DEFAULT_WIDTH: u32 = 512;
/// Default output height in pixels.
pub const DEFAULT_HEIGHT: u32 = 512;
/// `-1` asks the server for a random seed.
pub const DEFAULT_SEED: i64 = -1;
/// Default negative prompt.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "";

/// The full set of `(key, value)` defaults in application order.
pub fn generation_defaults() -> [(&'static str, Value); 7] {
    [
        ("steps", json!(DEFAULT_STEPS)),
        ("sampler_name", json!(DEFAULT_SAMPLER_NAME)),
        ("cfg_scale", json!(DEFAULT_CFG_SCALE)),
        ("width", json!(DEFAULT_WIDTH)),
        ("height", json!(DEFAULT_HEIGHT)),
        ("seed", json!(DEFAULT_SEED)),
        ("negative_prompt", json!(DEFAULT_NEGATIVE_PROMPT)),
    ]
}

/// Insert every default whose key is absent from `payload`.
///
/// Returns the keys that were filled in, in application order.
pub fn apply_defaults(payload: &mut Map<String, Value>) -> Vec<&'static str> {
    let mut filled = Vec::new();
    for (key, value) in generation_defaults() {
        if !payload.contains_key(key) {
            payload.insert(key.to_string(), value);
            filled.push(key);
        }
    }
    filled
}

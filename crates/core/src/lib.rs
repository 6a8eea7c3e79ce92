//! Pure domain logic for the Stable Diffusion job worker.
//!
//! Everything here is free of I/O: LoRA prompt injection, generation
//! defaults, and the payload transformation that turns a raw job input
//! into the body sent to the inference API.

pub mod defaults;
pub mod error;
pub mod json;
pub mod lora;
pub mod payload;

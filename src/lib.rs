//! draft-guard — safety pipeline for model-drafted email replies.

pub mod config;
pub mod draft;
pub mod error;
pub mod llm;
pub mod message;
pub mod pipeline;
pub mod safety;

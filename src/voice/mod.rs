//! Voice chat: recognition → voice assistant → synthesis, with safety limits,
//! in-band voice commands and keyword-based context extraction.

pub mod chat;
pub mod commands;
pub mod context;
pub mod profiles;
pub mod session;
pub mod speech;
pub mod summarizer;

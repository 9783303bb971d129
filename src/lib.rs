//! Lingo Relay - Local Translation Service Core
//!
//! Routes text to a locally hosted GGUF model (llama.cpp, CPU only) or to the
//! Baidu translation API, and returns normalized results. A desktop UI shell
//! reaches it through a local HTTP layer that maps onto [`service::TranslationService`].

pub mod cli;
pub mod config;
pub mod language;
pub mod engine;
pub mod translate;
pub mod catalog;
pub mod service;
pub mod error;

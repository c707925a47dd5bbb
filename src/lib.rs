//! Webwise: a web-powered chatbot and an AI project generator.
//!
//! Both front-ends proxy prompts to a remote chat-completion API. The web chat
//! grounds answers in search results and fetched pages; the smart chat can
//! attach an uploaded document as context and hands project requests over to
//! the [`project_generator`].

pub mod chat;
pub mod completion;
pub mod config;
pub mod constants;
pub mod documents;
pub mod error;
pub mod feedback;
pub mod folder_structure;
pub mod history;
pub mod project_generator;
pub mod search;
pub mod web_context;
pub mod web_server;

pub use error::{Result, WebwiseError};

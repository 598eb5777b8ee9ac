//! texbot: renders LaTeX snippets from chat messages into images.

pub mod channels;
pub mod config;
pub mod document;
pub mod error;
pub mod interpreter;
pub mod pipeline;
pub mod worker;
pub mod workspace;

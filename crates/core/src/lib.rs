//! Conversational orchestration core for the HomeVise real-estate advisor.
//!
//! The modules here implement the protocol work of driving a stateful,
//! tool-augmented dialogue against a remote generative model over two
//! transports: a request/response API for text turns and a bidirectional
//! streaming API for full-duplex voice. Everything UI-facing (rendering,
//! dashboards, calculators) lives outside this crate; everything
//! model-facing (turn encoding, retries, tool dispatch, audio framing)
//! lives here.

pub mod audio;
pub mod dialogue;
pub mod history;
pub mod model;
pub mod retry;
pub mod tools;
pub mod transcript;
pub mod voice;

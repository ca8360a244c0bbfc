//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the model client, the lead book, the listing
//! catalog, and the system prompt.

use crate::{catalog::ListingCatalog, config::Config, leads::LeadBook};
use homevise_core::model::ModelClient;
use std::sync::Arc;

/// The advisor persona submitted with every model request. A deployment
/// can replace it via `SYSTEM_PROMPT_PATH`.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Vy, a real-estate advisor for HomeVise, helping Vietnamese home \
buyers compare projects, understand financing, and plan a purchase. Answer \
in the language the user writes or speaks. Be concise and concrete. When a \
user shows buying intent, ask for their phone number and record it with the \
capture_lead tool; use search_listings to ground any claim about a specific \
project. Never invent listings or prices.";

/// Served instead of an error when the model quota is exhausted.
pub const OFFLINE_FALLBACK_REPLY: &str = "\
Our advisors are handling a high volume of requests right now. Please leave \
your phone number and we will call you back shortly.";

/// The shared application state, created once at startup and passed to
/// all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model_client: Arc<dyn ModelClient>,
    pub system_prompt: Arc<String>,
    pub leads: Arc<LeadBook>,
    pub catalog: Arc<ListingCatalog>,
}

//! In-memory listing catalog and its lookup tool.
//!
//! `search_listings` is the second business tool plugged into the router
//! seam: it grounds the model's claims about specific projects in data
//! the application controls. The catalog here is a small seeded set; a
//! real deployment would back the same handler with its inventory
//! service.

use async_trait::async_trait;
use homevise_core::tools::{ToolCall, ToolDeclaration, ToolHandler, ToolOutcome};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub name: String,
    pub district: String,
    pub price_range: String,
    pub summary: String,
}

pub struct ListingCatalog {
    listings: Vec<Listing>,
}

impl ListingCatalog {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self { listings }
    }

    /// A small demonstration inventory.
    pub fn seeded() -> Self {
        Self::new(vec![
            Listing {
                name: "Vinhomes Grand Park".into(),
                district: "Thủ Đức".into(),
                price_range: "2.3 - 4.5 tỷ".into(),
                summary: "Large mixed-use urban area with a central park and metro access."
                    .into(),
            },
            Listing {
                name: "Masteri Thảo Điền".into(),
                district: "Quận 2".into(),
                price_range: "3.8 - 7.0 tỷ".into(),
                summary: "Riverside high-rise near An Phú station, strong rental demand.".into(),
            },
            Listing {
                name: "Akari City".into(),
                district: "Bình Tân".into(),
                price_range: "1.9 - 3.2 tỷ".into(),
                summary: "Mid-range Japanese-developed complex on the Võ Văn Kiệt corridor."
                    .into(),
            },
        ])
    }

    /// Case-insensitive substring match over name and district.
    pub fn search(&self, query: &str) -> Vec<&Listing> {
        let needle = query.to_lowercase();
        self.listings
            .iter()
            .filter(|listing| {
                listing.name.to_lowercase().contains(&needle)
                    || listing.district.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

/// Handler for the `search_listings` tool.
pub struct ListingLookupHandler {
    catalog: Arc<ListingCatalog>,
}

impl ListingLookupHandler {
    pub const NAME: &'static str = "search_listings";

    pub fn new(catalog: Arc<ListingCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ToolHandler for ListingLookupHandler {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: Self::NAME.to_string(),
            description: "Search the current project inventory by project name or district. \
                          Use this before quoting availability or prices."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Project name or district to search for."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(query) if !query.trim().is_empty() => query.trim(),
            _ => {
                return ToolOutcome::Invalid {
                    raw: call.args.to_string(),
                    hint: "a non-empty query string is required".to_string(),
                };
            }
        };

        let matches = self.catalog.search(query);
        if matches.is_empty() {
            return ToolOutcome::Success(format!(
                "no listings in the current inventory match \"{query}\""
            ));
        }
        let lines: Vec<String> = matches
            .iter()
            .map(|listing| {
                format!(
                    "{} ({}, {}): {}",
                    listing.name, listing.district, listing.price_range, listing.summary
                )
            })
            .collect();
        ToolOutcome::Success(lines.join("\n"))
    }
}

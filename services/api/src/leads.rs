//! In-memory lead registry.
//!
//! The core validates and hands over prospect contacts through the
//! [`LeadSink`] seam; this implementation keeps them in process memory
//! and logs each capture. Durable storage is a deployment concern that
//! plugs in behind the same trait.

use async_trait::async_trait;
use homevise_core::tools::lead::{Lead, LeadSink};
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
pub struct LeadBook {
    entries: Mutex<Vec<Lead>>,
}

impl LeadBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every captured lead, oldest first.
    pub fn all(&self) -> Vec<Lead> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeadSink for LeadBook {
    async fn record(&self, lead: Lead) -> anyhow::Result<()> {
        info!(phone = %lead.phone, name = ?lead.name, "new lead captured");
        self.entries.lock().unwrap().push(lead);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_kept_in_arrival_order() {
        let book = LeadBook::new();
        for phone in ["0971132378", "0912345678"] {
            book.record(Lead {
                name: None,
                phone: phone.to_string(),
                note: None,
            })
            .await
            .unwrap();
        }
        let all = book.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].phone, "0971132378");
        assert_eq!(all[1].phone, "0912345678");
    }
}

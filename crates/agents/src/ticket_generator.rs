//! Keeps a minimum number of `New` tickets on the desk.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use deskside_core::{HardwareCatalog, NewTicket, TextGenerator, Ticket, TicketDesk, TicketStatus};
use deskside_infra::queue::{event_types, EventQueue};
use deskside_infra::workers::PollingTask;

/// Number of `New` tickets the generators keep available.
pub const DEFAULT_TICKET_FLOOR: u64 = 3;

/// Builds random hardware-failure tickets.
#[derive(Clone)]
pub struct TicketFactory {
    desk: Arc<dyn TicketDesk>,
    catalog: Arc<dyn HardwareCatalog>,
    writer: Option<Arc<dyn TextGenerator>>,
}

impl TicketFactory {
    pub fn new(desk: Arc<dyn TicketDesk>, catalog: Arc<dyn HardwareCatalog>) -> Self {
        Self {
            desk,
            catalog,
            writer: None,
        }
    }

    /// Let a text generator write the reporter's account of the fault.
    pub fn with_writer(mut self, writer: Arc<dyn TextGenerator>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Number of tickets currently in `New`.
    pub async fn new_ticket_count(&self) -> anyhow::Result<u64> {
        let counts = self
            .desk
            .count_by_status()
            .await
            .context("failed to count tickets by status")?;
        Ok(counts.get(&TicketStatus::New).copied().unwrap_or(0))
    }

    /// Create one ticket for a random catalog fault. `None` when the catalog
    /// has nothing that can break.
    pub async fn create_random(&self, reporter: Option<&str>) -> anyhow::Result<Option<Ticket>> {
        let Some(fault) = self.catalog.random_fault().await? else {
            return Ok(None);
        };

        let description = match &self.writer {
            Some(writer) => {
                let prompt = format!(
                    "Write a short, humorous report from someone whose {} ({}) is failing: {}. \
                     Have them misunderstand one of its features. Keep it under 200 words.",
                    fault.name, fault.model, fault.failure
                );
                crate::llm::generate_or(writer.as_ref(), &prompt, &fault.failure).await
            }
            None => fault.failure.clone(),
        };

        let ticket = self
            .desk
            .create_ticket(NewTicket {
                title: format!("{} {}: {}", fault.manufacturer, fault.name, fault.failure),
                description,
                product: Some(fault.product()),
                reporter: reporter.map(str::to_owned),
            })
            .await?;
        Ok(Some(ticket))
    }
}

/// Polling task that tops the desk up to the floor each cycle.
pub struct TicketGenerator {
    factory: TicketFactory,
    floor: u64,
    events: Option<EventQueue>,
}

impl TicketGenerator {
    pub fn new(factory: TicketFactory) -> Self {
        Self {
            factory,
            floor: DEFAULT_TICKET_FLOOR,
            events: None,
        }
    }

    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    /// Publish `ticket_submitted` for every ticket created.
    pub fn with_events(mut self, events: EventQueue) -> Self {
        self.events = Some(events);
        self
    }

    /// Create tickets until the floor is met or creation fails. Returns how
    /// many were created.
    pub async fn fill_to_floor(&self) -> anyhow::Result<u64> {
        let mut new_tickets = self.factory.new_ticket_count().await?;
        let mut created = 0;

        while new_tickets < self.floor {
            match self.factory.create_random(None).await {
                Ok(Some(ticket)) => {
                    info!(ticket_id = %ticket.id, title = %ticket.title, "created new ticket");
                    self.publish(&ticket).await;
                    new_tickets += 1;
                    created += 1;
                }
                Ok(None) => {
                    warn!("did not create a new ticket: hardware catalog has no failures");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "did not create a new ticket");
                    break;
                }
            }
        }
        Ok(created)
    }

    async fn publish(&self, ticket: &Ticket) {
        let Some(events) = &self.events else {
            return;
        };
        let payload = json!({ "ticket_id": ticket.id, "title": ticket.title });
        if let Err(err) = events.enqueue(event_types::TICKET_SUBMITTED, payload).await {
            warn!(error = %err, ticket_id = %ticket.id, "failed to publish ticket_submitted");
        }
    }
}

#[async_trait]
impl PollingTask for TicketGenerator {
    fn name(&self) -> &str {
        "ticket_generator"
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        self.fill_to_floor().await?;
        Ok(())
    }
}

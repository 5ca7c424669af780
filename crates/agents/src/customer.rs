//! Simulated customers who raise tickets on their own schedules.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use deskside_infra::workers::PollingTask;

use crate::ticket_generator::{TicketFactory, DEFAULT_TICKET_FLOOR};

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: String,
    pub name: String,
    /// 0.0 (furious) to 1.0 (delighted).
    pub satisfaction: f64,
    pub last_contact: Option<DateTime<Utc>>,
    /// Mean time between tickets.
    pub contact_every: TimeDelta,
    /// 1 (lowest) to 5 (highest).
    pub priority: u8,
}

impl Customer {
    pub fn new(id: &str, name: &str, satisfaction: f64, contact_every_hours: i64, priority: u8) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            satisfaction,
            last_contact: None,
            contact_every: TimeDelta::hours(contact_every_hours),
            priority,
        }
    }

    /// Never contacted, or the contact interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_contact {
            None => true,
            Some(last) => now - last >= self.contact_every,
        }
    }

    pub fn adjust_satisfaction(&mut self, resolved: bool) {
        let delta = if resolved { 0.1 } else { -0.2 };
        self.satisfaction = (self.satisfaction + delta).clamp(0.0, 1.0);
    }
}

pub fn default_roster() -> Vec<Customer> {
    vec![
        Customer::new("cust_001", "Enterprise Client A", 0.8, 48, 5),
        Customer::new("cust_002", "Small Business B", 0.6, 24, 3),
        Customer::new("cust_003", "Individual User C", 0.9, 72, 1),
    ]
}

pub struct CustomerAgent {
    factory: TicketFactory,
    floor: u64,
    customers: Mutex<Vec<Customer>>,
}

impl CustomerAgent {
    pub fn new(factory: TicketFactory) -> Self {
        Self::with_roster(factory, default_roster())
    }

    pub fn with_roster(factory: TicketFactory, customers: Vec<Customer>) -> Self {
        Self {
            factory,
            floor: DEFAULT_TICKET_FLOOR,
            customers: Mutex::new(customers),
        }
    }

    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.customers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Raise one ticket for each due customer, in roster order, until the
    /// desk holds `floor` new tickets. Returns the number created.
    pub async fn contact_due_customers(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut new_tickets = self.factory.new_ticket_count().await?;
        let due: Vec<(String, String)> = self
            .customers()
            .into_iter()
            .filter(|c| c.is_due(now))
            .map(|c| (c.id, c.name))
            .collect();

        let mut created = 0;
        for (id, name) in due {
            if new_tickets >= self.floor {
                break;
            }
            match self.factory.create_random(Some(&name)).await {
                Ok(Some(ticket)) => {
                    info!(customer = %name, ticket_id = %ticket.id, "created ticket for customer");
                    self.update(&id, |c| c.last_contact = Some(now));
                    new_tickets += 1;
                    created += 1;
                }
                Ok(None) => warn!(customer = %name, "failed to create ticket for customer: no hardware faults"),
                Err(err) => warn!(customer = %name, error = %err, "failed to create ticket for customer"),
            }
        }
        Ok(created)
    }

    /// Apply the outcome of a customer's ticket. Returns the new satisfaction,
    /// or `None` for an unknown customer.
    pub fn record_outcome(&self, customer_id: &str, resolved: bool) -> Option<f64> {
        self.update(customer_id, |c| c.adjust_satisfaction(resolved))
            .map(|c| c.satisfaction)
    }

    fn update(&self, customer_id: &str, f: impl FnOnce(&mut Customer)) -> Option<Customer> {
        let mut customers = self.customers.lock().unwrap_or_else(PoisonError::into_inner);
        let customer = customers.iter_mut().find(|c| c.id == customer_id)?;
        f(customer);
        Some(customer.clone())
    }
}

#[async_trait]
impl PollingTask for CustomerAgent {
    fn name(&self) -> &str {
        "customer_agent"
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        self.contact_due_customers(Utc::now()).await?;
        Ok(())
    }
}

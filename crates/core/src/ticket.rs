//! Support tickets and the hardware faults that cause them.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{HardwareId, TicketId};

/// Lifecycle of a support ticket.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TicketStatus {
    #[serde(rename = "New")]
    New,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Resolved")]
    Resolved,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "New",
            TicketStatus::InProgress => "In Progress",
            TicketStatus::Resolved => "Resolved",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TicketStatus::Resolved)
    }
}

impl FromStr for TicketStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(TicketStatus::New),
            "In Progress" => Ok(TicketStatus::InProgress),
            "Resolved" => Ok(TicketStatus::Resolved),
            other => Err(DomainError::unknown_status(other)),
        }
    }
}

/// A piece of hardware a ticket is about, as recorded in the tickets store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub category: String,
}

/// A catalog item paired with one of its known failure descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareFault {
    pub hardware_id: HardwareId,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub category: String,
    pub failure: String,
}

impl HardwareFault {
    pub fn product(&self) -> Product {
        Product {
            name: self.name.clone(),
            model: self.model.clone(),
            manufacturer: self.manufacturer.clone(),
            category: self.category.clone(),
        }
    }
}

/// Input for ticket creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub product: Option<Product>,
    /// Who raised the ticket (customer or employee display name).
    pub reporter: Option<String>,
}

/// A persisted support ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    pub status: TicketStatus,
    pub description: String,
    pub product: Option<Product>,
    pub reporter: Option<String>,
    pub created_at: DateTime<Utc>,
}

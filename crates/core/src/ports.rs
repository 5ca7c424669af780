//! Collaborator interfaces the background workers depend on.
//!
//! The workers only see these traits; the SQLite-backed implementations live in
//! `deskside-infra` and tests substitute in-memory fakes. Failures are reported
//! as `anyhow::Error` because callers only log and carry on.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::id::{EmployeeId, MessageId};
use crate::mail::Message;
use crate::staff::{Employee, Role};
use crate::ticket::{HardwareFault, NewTicket, Ticket, TicketStatus};

#[async_trait]
pub trait TicketDesk: Send + Sync {
    /// Number of tickets currently in each status. Missing statuses count as zero.
    async fn count_by_status(&self) -> anyhow::Result<HashMap<TicketStatus, u64>>;

    async fn create_ticket(&self, ticket: NewTicket) -> anyhow::Result<Ticket>;

    /// Tickets that are not yet resolved, oldest first.
    async fn active_tickets(&self) -> anyhow::Result<Vec<Ticket>>;
}

#[async_trait]
pub trait HardwareCatalog: Send + Sync {
    /// A random catalog item with one of its failure descriptions, or `None`
    /// when the catalog has nothing that can fail.
    async fn random_fault(&self) -> anyhow::Result<Option<HardwareFault>>;
}

#[async_trait]
pub trait StaffDirectory: Send + Sync {
    async fn all_staff(&self) -> anyhow::Result<Vec<Employee>>;

    /// First employee holding the role with the given title.
    async fn staff_by_role(&self, role_title: &str) -> anyhow::Result<Option<Employee>>;

    async fn roles(&self) -> anyhow::Result<Vec<Role>>;

    async fn employee(&self, id: EmployeeId) -> anyhow::Result<Option<Employee>>;
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages addressed to `recipient`, oldest first.
    async fn unread_messages(&self, recipient: EmployeeId) -> anyhow::Result<Vec<Message>>;

    async fn send_message(
        &self,
        sender: EmployeeId,
        recipient: EmployeeId,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<MessageId>;

    async fn mark_read(&self, id: MessageId) -> anyhow::Result<()>;
}

/// Free-text generation (an LLM in the game, a canned string offline).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

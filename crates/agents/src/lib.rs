//! Background agents of the helpdesk simulation.
//!
//! Each agent is a [`PollingTask`](deskside_infra::workers::PollingTask) meant
//! to be driven by a `PollingWorker`; the game binary owns their lifecycle.

pub mod customer;
pub mod error;
pub mod hr_responder;
pub mod llm;
pub mod role_agents;
pub mod ticket_generator;

#[cfg(test)]
mod fakes;

pub use customer::{default_roster, Customer, CustomerAgent};
pub use error::AgentError;
pub use hr_responder::{HrCapabilities, HrResponder, FALLBACK_REPLY, HR_ROLE};
pub use llm::{generate_or, CannedTextGenerator, HttpTextGenerator};
pub use role_agents::{RoleAgentManager, RoleResponder};
pub use ticket_generator::{TicketFactory, TicketGenerator, DEFAULT_TICKET_FLOOR};

//! `deskside-core`: shared vocabulary of the helpdesk simulation.
//!
//! Identifiers, the storage domain enumeration, the entity shapes the
//! background workers touch and the collaborator traits they are written
//! against. No storage or runtime concerns live here.

pub mod calendar;
pub mod domain;
pub mod error;
pub mod id;
pub mod mail;
pub mod ports;
pub mod staff;
pub mod ticket;

pub use calendar::{GameDay, Meeting};
pub use domain::Domain;
pub use error::DomainError;
pub use id::{EmployeeId, HardwareId, MessageId, RoleId, TicketId};
pub use mail::Message;
pub use ports::{HardwareCatalog, Mailbox, StaffDirectory, TextGenerator, TicketDesk};
pub use staff::{Employee, Role};
pub use ticket::{HardwareFault, NewTicket, Product, Ticket, TicketStatus};

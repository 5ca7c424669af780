//! SQLite repositories for the game's domain databases.
//!
//! Each repository owns one domain and implements the matching port from
//! `deskside_core::ports`.

pub mod calendar;
pub mod hardware;
pub mod mailbox;
pub mod staff;
pub mod tickets;

pub use calendar::{CalendarRepository, NewMeeting};
pub use hardware::{CatalogEntry, HardwareRepository};
pub use mailbox::MailboxRepository;
pub use staff::{NewEmployee, StaffRepository};
pub use tickets::TicketRepository;

use crate::storage::{Storage, StorageError};

/// Create every domain schema that is missing. Safe to call on each start.
pub async fn init_all(storage: &Storage) -> Result<(), StorageError> {
    TicketRepository::new(storage.clone()).init().await?;
    HardwareRepository::new(storage.clone()).init().await?;
    StaffRepository::new(storage.clone()).init().await?;
    MailboxRepository::new(storage.clone()).init().await?;
    CalendarRepository::new(storage.clone()).init().await?;
    tracing::debug!("domain schemas initialized");
    Ok(())
}

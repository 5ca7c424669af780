//! The fixed set of persistent stores the game works against.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A named persistent store. Each domain owns exactly one database file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Tickets,
    Hardware,
    Hr,
    Mailbox,
    Calendar,
    Player,
    GameState,
}

impl Domain {
    pub const ALL: [Domain; 7] = [
        Domain::Tickets,
        Domain::Hardware,
        Domain::Hr,
        Domain::Mailbox,
        Domain::Calendar,
        Domain::Player,
        Domain::GameState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Tickets => "tickets",
            Domain::Hardware => "hardware",
            Domain::Hr => "hr",
            Domain::Mailbox => "mailbox",
            Domain::Calendar => "calendar",
            Domain::Player => "player",
            Domain::GameState => "game_state",
        }
    }

    /// Default database file name inside the data directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Domain::Tickets => "tickets.db",
            Domain::Hardware => "hardware_catalog.db",
            Domain::Hr => "hr.db",
            Domain::Mailbox => "mailbox.db",
            Domain::Calendar => "calendar.db",
            Domain::Player => "player.db",
            Domain::GameState => "game_state.db",
        }
    }
}

impl core::fmt::Display for Domain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|domain| domain.as_str() == s)
            .ok_or_else(|| DomainError::unknown_domain(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_registered_name() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "payroll".parse::<Domain>(),
            Err(DomainError::UnknownDomain("payroll".into()))
        );
    }
}

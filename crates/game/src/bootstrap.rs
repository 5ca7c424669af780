//! First-run setup: schemas plus the staff and hardware the workers need.

use anyhow::Context;
use chrono::NaiveDate;
use tracing::info;

use deskside_infra::db::{
    self, CalendarRepository, CatalogEntry, HardwareRepository, MailboxRepository, NewEmployee,
    StaffRepository, TicketRepository,
};
use deskside_infra::storage::Storage;

/// The SQLite-backed collaborators, ready for use.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub tickets: TicketRepository,
    pub hardware: HardwareRepository,
    pub staff: StaffRepository,
    pub mailbox: MailboxRepository,
    pub calendar: CalendarRepository,
}

const ROLES: &[(&str, &str)] = &[
    ("Vice President, Operations", "Oversees all operational aspects of the organization"),
    ("HR Manager", "Oversees all human resources operations and policies"),
    ("IT Manager", "Manages IT department operations and personnel"),
    ("IT Support Specialist", "Provides technical support for hardware and software issues"),
    ("Hardware Technician", "Specializes in hardware repairs and maintenance"),
];

// (first, last, role, hired)
const EMPLOYEES: &[(&str, &str, &str, (i32, u32, u32))] = &[
    ("Sarah", "Chen", "Vice President, Operations", (2019, 1, 1)),
    ("Joanna", "Flair", "HR Manager", (2020, 1, 15)),
    ("Jill", "Crumburg", "IT Manager", (2020, 1, 15)),
    ("Hilton", "Adams", "Hardware Technician", (2021, 3, 1)),
];

fn catalog() -> Vec<CatalogEntry> {
    let entry = |category: &str, name: &str, manufacturer: &str, model: &str, failures: &[&str]| CatalogEntry {
        category: category.to_owned(),
        name: name.to_owned(),
        manufacturer: manufacturer.to_owned(),
        model: model.to_owned(),
        failures: failures.iter().map(|f| (*f).to_owned()).collect(),
    };
    vec![
        entry(
            "consumer-electronics",
            "QuantumCore Home Assistant",
            "FutureTech Industries",
            "QCH-3000",
            &[
                "Quantum state decoherence in processing unit",
                "Holographic storage matrix corruption",
                "QEN transceiver alignment drift",
            ],
        ),
        entry(
            "consumer-electronics",
            "NeuralSync VR Headset",
            "MindLink Technologies",
            "NS-VR-500",
            &["Neural interface desynchronization", "Quantum cell battery swelling"],
        ),
        entry(
            "office",
            "LaserJet Infinity",
            "PrintCorp",
            "LJ-9000",
            &["Paper feed jams on every third page", "Toner cartridge not recognized"],
        ),
        entry(
            "workstations",
            "ThinkStation Z",
            "Lenovo",
            "Z-940",
            &["Fans run at full speed after sleep", "Intermittent blue screen on boot"],
        ),
    ]
}

/// Create every schema and seed missing staff and catalog rows.
pub async fn prepare(storage: &Storage) -> anyhow::Result<Collaborators> {
    db::init_all(storage).await.context("failed to initialize schemas")?;

    let collaborators = Collaborators {
        tickets: TicketRepository::new(storage.clone()),
        hardware: HardwareRepository::new(storage.clone()),
        staff: StaffRepository::new(storage.clone()),
        mailbox: MailboxRepository::new(storage.clone()),
        calendar: CalendarRepository::new(storage.clone()),
    };

    seed_staff(&collaborators.staff).await?;
    if collaborators.hardware.item_count().await? == 0 {
        for entry in catalog() {
            collaborators.hardware.add_item(entry).await?;
        }
        info!("seeded hardware catalog");
    }

    let today = collaborators.calendar.current_day().await?;
    info!(day = today.day_number, "game calendar ready");
    Ok(collaborators)
}

async fn seed_staff(staff: &StaffRepository) -> anyhow::Result<()> {
    for (title, description) in ROLES {
        staff.ensure_role(title, Some(*description)).await?;
    }
    for (first, last, role, (year, month, day)) in EMPLOYEES {
        let role_id = staff.ensure_role(role, None).await?;
        let hire_date = NaiveDate::from_ymd_opt(*year, *month, *day)
            .with_context(|| format!("invalid hire date for {first} {last}"))?;
        staff
            .ensure_employee(NewEmployee {
                first_name: (*first).to_owned(),
                last_name: (*last).to_owned(),
                email: format!("{}.{}@company.com", first.to_lowercase(), last.to_lowercase()),
                role_id: Some(role_id),
                hire_date,
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskside_core::{HardwareCatalog, StaffDirectory};
    use deskside_infra::storage::StorageConfig;

    #[tokio::test]
    async fn prepare_is_idempotent_and_staffs_hr() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(StorageConfig::in_dir(dir.path()));

        prepare(&storage).await.unwrap();
        let collaborators = prepare(&storage).await.unwrap();

        assert_eq!(collaborators.staff.all_staff().await.unwrap().len(), EMPLOYEES.len());
        assert_eq!(collaborators.hardware.item_count().await.unwrap(), 4);
        let hr = collaborators.staff.staff_by_role("HR Manager").await.unwrap().unwrap();
        assert_eq!(hr.email, "joanna.flair@company.com");
        assert!(collaborators.hardware.random_fault().await.unwrap().is_some());
    }
}

//! In-memory collaborators for agent tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;

use deskside_core::{
    Employee, EmployeeId, HardwareCatalog, HardwareFault, HardwareId, Mailbox, Message, MessageId,
    NewTicket, Role, RoleId, StaffDirectory, TextGenerator, Ticket, TicketDesk, TicketId,
    TicketStatus,
};

#[derive(Default)]
pub struct FakeDesk {
    tickets: Mutex<Vec<Ticket>>,
    remaining_creates: Mutex<Option<usize>>,
    failing_creates: Mutex<usize>,
}

impl FakeDesk {
    pub fn seed(&self, status: TicketStatus, count: usize) {
        let mut tickets = self.tickets.lock().unwrap();
        for n in 0..count {
            tickets.push(Ticket {
                id: TicketId::new(),
                title: format!("seeded {n}"),
                status,
                description: String::new(),
                product: None,
                reporter: None,
                created_at: Utc::now(),
            });
        }
    }

    /// Allow `n` more creations, then fail every one after.
    pub fn fail_after(&self, n: usize) {
        *self.remaining_creates.lock().unwrap() = Some(n);
    }

    /// Fail the next `n` creations, then accept again.
    pub fn fail_next(&self, n: usize) {
        *self.failing_creates.lock().unwrap() = n;
    }

    pub fn count(&self, status: TicketStatus) -> usize {
        self.tickets.lock().unwrap().iter().filter(|t| t.status == status).count()
    }

    pub fn contains(&self, id: TicketId) -> bool {
        self.tickets.lock().unwrap().iter().any(|t| t.id == id)
    }

    pub fn reporters(&self) -> Vec<String> {
        self.tickets
            .lock()
            .unwrap()
            .iter()
            .filter_map(|t| t.reporter.clone())
            .collect()
    }
}

#[async_trait]
impl TicketDesk for FakeDesk {
    async fn count_by_status(&self) -> anyhow::Result<HashMap<TicketStatus, u64>> {
        let mut counts = HashMap::new();
        for ticket in self.tickets.lock().unwrap().iter() {
            *counts.entry(ticket.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn create_ticket(&self, ticket: NewTicket) -> anyhow::Result<Ticket> {
        {
            let mut failing = self.failing_creates.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                bail!("tickets store is busy");
            }
        }
        if let Some(remaining) = self.remaining_creates.lock().unwrap().as_mut() {
            if *remaining == 0 {
                bail!("tickets store is locked");
            }
            *remaining -= 1;
        }
        let created = Ticket {
            id: TicketId::new(),
            title: ticket.title,
            status: TicketStatus::New,
            description: ticket.description,
            product: ticket.product,
            reporter: ticket.reporter,
            created_at: Utc::now(),
        };
        self.tickets.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn active_tickets(&self) -> anyhow::Result<Vec<Ticket>> {
        Ok(self
            .tickets
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.status.is_open())
            .cloned()
            .collect())
    }
}

pub struct FakeCatalog {
    fault: Option<HardwareFault>,
}

impl FakeCatalog {
    pub fn laptops() -> Self {
        Self {
            fault: Some(HardwareFault {
                hardware_id: HardwareId::new(1),
                name: "ThinkPad".into(),
                manufacturer: "Lenovo".into(),
                model: "X1".into(),
                category: "Laptops".into(),
                failure: "Battery swells".into(),
            }),
        }
    }

    pub fn empty() -> Self {
        Self { fault: None }
    }
}

#[async_trait]
impl HardwareCatalog for FakeCatalog {
    async fn random_fault(&self) -> anyhow::Result<Option<HardwareFault>> {
        Ok(self.fault.clone())
    }
}

#[derive(Default)]
pub struct FakeStaff {
    roles: Vec<Role>,
    employees: Vec<Employee>,
}

impl FakeStaff {
    pub fn with_role(mut self, id: i64, title: &str) -> Self {
        self.roles.push(Role {
            id: RoleId::new(id),
            title: title.into(),
            description: None,
        });
        self
    }

    pub fn with_employee(mut self, id: i64, first: &str, last: &str, role: Option<i64>) -> Self {
        self.employees.push(Employee {
            id: EmployeeId::new(id),
            first_name: first.into(),
            last_name: last.into(),
            email: format!("{}@example.com", first.to_lowercase()),
            role_id: role.map(RoleId::new),
            employment_status: "active".into(),
        });
        self
    }
}

#[async_trait]
impl StaffDirectory for FakeStaff {
    async fn all_staff(&self) -> anyhow::Result<Vec<Employee>> {
        Ok(self.employees.clone())
    }

    async fn staff_by_role(&self, role_title: &str) -> anyhow::Result<Option<Employee>> {
        let Some(role) = self.roles.iter().find(|r| r.title == role_title) else {
            return Ok(None);
        };
        Ok(self.employees.iter().find(|e| e.role_id == Some(role.id)).cloned())
    }

    async fn roles(&self) -> anyhow::Result<Vec<Role>> {
        Ok(self.roles.clone())
    }

    async fn employee(&self, id: EmployeeId) -> anyhow::Result<Option<Employee>> {
        Ok(self.employees.iter().find(|e| e.id == id).cloned())
    }
}

#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<Vec<Message>>,
}

impl FakeMailbox {
    pub fn deliver(&self, from: i64, to: i64, subject: &str, content: &str) -> MessageId {
        let mut messages = self.messages.lock().unwrap();
        let id = MessageId::new(messages.len() as i64 + 1);
        messages.push(Message {
            id,
            sender_id: EmployeeId::new(from),
            recipient_id: EmployeeId::new(to),
            subject: subject.into(),
            content: content.into(),
            sent_at: Utc::now(),
            is_read: false,
        });
        id
    }

    pub fn inbox(&self, recipient: i64) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.recipient_id == EmployeeId::new(recipient))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn unread_messages(&self, recipient: EmployeeId) -> anyhow::Result<Vec<Message>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.recipient_id == recipient && !m.is_read)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        sender: EmployeeId,
        recipient: EmployeeId,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<MessageId> {
        Ok(self.deliver(sender.get(), recipient.get(), subject, body))
    }

    async fn mark_read(&self, id: MessageId) -> anyhow::Result<()> {
        for message in self.messages.lock().unwrap().iter_mut() {
            if message.id == id {
                message.is_read = true;
            }
        }
        Ok(())
    }
}

pub struct FailingWriter;

#[async_trait]
impl TextGenerator for FailingWriter {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        bail!("model offline")
    }
}

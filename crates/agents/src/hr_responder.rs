//! HR Manager auto-responder.
//!
//! Answers the HR Manager's unread mail and periodically reviews staff for
//! anyone who needs a proactive check-in.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use deskside_core::{Employee, Mailbox, Message, StaffDirectory, TextGenerator};
use deskside_infra::workers::PollingTask;

use crate::error::AgentError;
use crate::llm::generate_or;

pub const HR_ROLE: &str = "HR Manager";

/// Sent when no reply could be generated.
pub const FALLBACK_REPLY: &str = "Thank you for your message. I apologize, but I'm currently experiencing technical difficulties. Please try again later or contact the IT department for assistance.";

const OUTREACH_SUBJECT: &str = "HR Check-in";

/// Which duties the responder performs each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrCapabilities {
    pub message_handling: bool,
    pub employee_concerns: bool,
}

impl Default for HrCapabilities {
    fn default() -> Self {
        Self {
            message_handling: true,
            employee_concerns: true,
        }
    }
}

pub struct HrResponder {
    role: String,
    hr: Employee,
    staff: Arc<dyn StaffDirectory>,
    mailbox: Arc<dyn Mailbox>,
    writer: Arc<dyn TextGenerator>,
    capabilities: HrCapabilities,
}

impl HrResponder {
    /// Resolve the employee holding `role`. Fails if the role does not exist
    /// or nobody holds it.
    pub async fn new(
        role: &str,
        staff: Arc<dyn StaffDirectory>,
        mailbox: Arc<dyn Mailbox>,
        writer: Arc<dyn TextGenerator>,
    ) -> Result<Self, AgentError> {
        let roles = staff.roles().await?;
        if !roles.iter().any(|r| r.title == role) {
            return Err(AgentError::MissingRole(role.to_owned()));
        }
        let hr = staff
            .staff_by_role(role)
            .await?
            .ok_or_else(|| AgentError::MissingStaff(role.to_owned()))?;

        Ok(Self {
            role: role.to_owned(),
            hr,
            staff,
            mailbox,
            writer,
            capabilities: HrCapabilities::default(),
        })
    }

    pub fn with_capabilities(mut self, capabilities: HrCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The employee this responder writes as.
    pub fn employee(&self) -> &Employee {
        &self.hr
    }

    /// Reply to every unread message. Returns the number answered.
    pub async fn answer_unread(&self) -> anyhow::Result<usize> {
        let unread = self
            .mailbox
            .unread_messages(self.hr.id)
            .await
            .context("failed to fetch HR mail")?;

        let mut answered = 0;
        for message in unread {
            match self.answer(&message).await {
                Ok(()) => {
                    info!(message_id = %message.id, sender_id = %message.sender_id, "HR responder answered message");
                    answered += 1;
                }
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "HR responder could not answer message");
                }
            }
        }
        Ok(answered)
    }

    async fn answer(&self, message: &Message) -> anyhow::Result<()> {
        let sender = match self.staff.employee(message.sender_id).await? {
            Some(employee) => employee.full_name(),
            None => format!("employee #{}", message.sender_id),
        };
        let prompt = format!(
            "As an {role}, respond to the following message from {sender}:\n\
             Subject: {subject}\n\
             Content: {content}\n\n\
             Be professional, empathetic and confidential, and give clear next steps. \
             Keep the response under 200 words.",
            role = self.role,
            subject = message.subject,
            content = message.content,
        );
        let reply = generate_or(self.writer.as_ref(), &prompt, FALLBACK_REPLY).await;

        self.mailbox
            .send_message(self.hr.id, message.sender_id, &message.reply_subject(), &reply)
            .await?;
        self.mailbox.mark_read(message.id).await?;
        Ok(())
    }

    /// Look over all staff and send a check-in to anyone who needs one.
    /// Returns the number of check-ins sent.
    pub async fn review_staff_concerns(&self) -> anyhow::Result<usize> {
        let staff = self.staff.all_staff().await.context("failed to list staff")?;

        let mut sent = 0;
        for employee in staff.iter().filter(|e| e.id != self.hr.id) {
            if !needs_outreach(employee) {
                continue;
            }
            let prompt = format!(
                "As an {}, write a supportive check-in message to {} offering support and resources. \
                 Keep it under 150 words.",
                self.role,
                employee.full_name()
            );
            match self.writer.generate(&prompt).await {
                Ok(body) => {
                    self.mailbox
                        .send_message(self.hr.id, employee.id, OUTREACH_SUBJECT, &body)
                        .await?;
                    sent += 1;
                }
                Err(err) => warn!(employee_id = %employee.id, error = %err, "could not write HR check-in"),
            }
        }
        debug!(reviewed = staff.len(), sent, "HR staff review finished");
        Ok(sent)
    }
}

// TODO: flag employees from their performance_ratings history once ratings
// are recorded during play.
fn needs_outreach(_employee: &Employee) -> bool {
    false
}

#[async_trait]
impl PollingTask for HrResponder {
    fn name(&self) -> &str {
        "hr_responder"
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        if self.capabilities.message_handling {
            self.answer_unread().await?;
        }
        if self.capabilities.employee_concerns {
            self.review_staff_concerns().await?;
        }
        Ok(())
    }
}

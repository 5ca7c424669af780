//! Canned auto-responders, one per staff role.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use deskside_core::{Mailbox, Role, RoleId, StaffDirectory};
use deskside_infra::workers::{PollingTask, PollingWorker, WorkerSchedule};

use crate::error::AgentError;

/// Replies to unread mail of every employee holding one role.
pub struct RoleResponder {
    role: Role,
    name: String,
    staff: Arc<dyn StaffDirectory>,
    mailbox: Arc<dyn Mailbox>,
}

impl RoleResponder {
    pub async fn new(
        role_id: RoleId,
        staff: Arc<dyn StaffDirectory>,
        mailbox: Arc<dyn Mailbox>,
    ) -> Result<Self, AgentError> {
        let role = staff
            .roles()
            .await?
            .into_iter()
            .find(|r| r.id == role_id)
            .ok_or_else(|| AgentError::MissingRole(role_id.to_string()))?;
        Ok(Self {
            name: format!("role_agent[{}]", role.title),
            role,
            staff,
            mailbox,
        })
    }

    fn reply_text(&self) -> String {
        format!(
            "Thank you for your message. This is an automated response from the {} role. \
             Your message has been received and will be processed according to our standard procedures.",
            self.role.title
        )
    }

    /// Answer all unread mail for the role's holders. Returns the number answered.
    pub async fn answer_unread(&self) -> anyhow::Result<usize> {
        let holders: Vec<_> = self
            .staff
            .all_staff()
            .await
            .context("failed to list staff")?
            .into_iter()
            .filter(|e| e.role_id == Some(self.role.id))
            .collect();

        let reply = self.reply_text();
        let mut answered = 0;
        for employee in holders {
            for message in self.mailbox.unread_messages(employee.id).await? {
                self.mailbox
                    .send_message(employee.id, message.sender_id, &message.reply_subject(), &reply)
                    .await?;
                self.mailbox.mark_read(message.id).await?;
                info!(role = %self.role.title, message_id = %message.id, "role agent answered message");
                answered += 1;
            }
        }
        Ok(answered)
    }
}

#[async_trait]
impl PollingTask for RoleResponder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        self.answer_unread().await?;
        Ok(())
    }
}

/// Starts and stops [`RoleResponder`] workers by role id.
pub struct RoleAgentManager {
    staff: Arc<dyn StaffDirectory>,
    mailbox: Arc<dyn Mailbox>,
    schedule: WorkerSchedule,
    agents: Mutex<BTreeMap<RoleId, PollingWorker<RoleResponder>>>,
}

impl RoleAgentManager {
    pub fn new(staff: Arc<dyn StaffDirectory>, mailbox: Arc<dyn Mailbox>, schedule: WorkerSchedule) -> Self {
        Self {
            staff,
            mailbox,
            schedule,
            agents: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start an agent for every role. Returns the number started.
    pub async fn start_all(&self) -> anyhow::Result<usize> {
        let roles = self.staff.roles().await.context("failed to list roles")?;
        let mut started = 0;
        for role in roles {
            match self.start_agent(role.id).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(err) => error!(role_id = %role.id, error = %err, "failed to start role agent"),
            }
        }
        Ok(started)
    }

    /// Returns `false` if an agent for the role is already running.
    pub async fn start_agent(&self, role_id: RoleId) -> Result<bool, AgentError> {
        let mut agents = self.agents.lock().await;
        if agents.contains_key(&role_id) {
            warn!(role_id = %role_id, "agent for role is already running");
            return Ok(false);
        }

        let responder = RoleResponder::new(role_id, self.staff.clone(), self.mailbox.clone()).await?;
        let worker = PollingWorker::new(responder, self.schedule.clone());
        worker.start().await;
        agents.insert(role_id, worker);
        Ok(true)
    }

    pub async fn stop_agent(&self, role_id: RoleId) {
        let Some(worker) = self.agents.lock().await.remove(&role_id) else {
            warn!(role_id = %role_id, "no agent running for role");
            return;
        };
        worker.stop().await;
    }

    pub async fn stop_all(&self) {
        let agents = std::mem::take(&mut *self.agents.lock().await);
        for worker in agents.into_values() {
            worker.stop().await;
        }
        info!("all role agents stopped");
    }

    pub async fn running_roles(&self) -> Vec<RoleId> {
        self.agents.lock().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fakes::{FakeMailbox, FakeStaff};

    fn office() -> Arc<FakeStaff> {
        Arc::new(
            FakeStaff::default()
                .with_role(1, "IT Support")
                .with_role(2, "Facilities")
                .with_employee(10, "Alex", "Rivera", Some(1))
                .with_employee(11, "Sam", "Okafor", Some(2))
                .with_employee(12, "Lee", "Chen", Some(2)),
        )
    }

    #[tokio::test]
    async fn responder_answers_every_holder_of_the_role() {
        let mailbox = Arc::new(FakeMailbox::default());
        let responder = RoleResponder::new(RoleId::new(2), office(), mailbox.clone()).await.unwrap();

        mailbox.deliver(10, 11, "Broken chair", "It wobbles");
        mailbox.deliver(10, 12, "Heating", "Too cold");
        mailbox.deliver(11, 10, "Printer", "Jammed");

        assert_eq!(responder.answer_unread().await.unwrap(), 2);

        let inbox = mailbox.inbox(10);
        let mut replies: Vec<_> = inbox.iter().filter(|m| m.subject.starts_with("Re: ")).collect();
        replies.sort_by_key(|m| m.sender_id);
        assert_eq!(
            replies.iter().map(|m| (m.sender_id.get(), m.subject.as_str())).collect::<Vec<_>>(),
            vec![(11, "Re: Broken chair"), (12, "Re: Heating")]
        );
        assert!(replies.iter().all(|m| m.content.contains("from the Facilities role")));

        // Mail to holders is read; mail to the sender's own inbox is untouched.
        assert!(mailbox.inbox(11).iter().all(|m| m.is_read));
        assert!(mailbox.inbox(12).iter().all(|m| m.is_read));
        let printer = inbox.iter().find(|m| m.subject == "Printer").unwrap();
        assert!(!printer.is_read);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let result = RoleResponder::new(RoleId::new(99), office(), Arc::new(FakeMailbox::default())).await;
        assert!(matches!(result, Err(AgentError::MissingRole(_))));
    }

    #[tokio::test]
    async fn manager_starts_and_stops_agents_per_role() {
        let manager = RoleAgentManager::new(
            office(),
            Arc::new(FakeMailbox::default()),
            WorkerSchedule::every(Duration::from_secs(3600)),
        );

        assert_eq!(manager.start_all().await.unwrap(), 2);
        assert!(!manager.start_agent(RoleId::new(1)).await.unwrap());
        assert!(manager.start_agent(RoleId::new(7)).await.is_err());

        manager.stop_agent(RoleId::new(1)).await;
        assert_eq!(manager.running_roles().await, vec![RoleId::new(2)]);

        manager.stop_all().await;
        assert!(manager.running_roles().await.is_empty());
    }
}

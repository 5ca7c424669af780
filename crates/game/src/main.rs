//! Deskside: the helpdesk simulation's background services.
//!
//! Owns the lifecycle of the queue manager and every polling worker. The
//! interactive session runs in the foreground; Ctrl+C shuts everything down.

mod bootstrap;
mod config;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use deskside_agents::{
    CannedTextGenerator, CustomerAgent, HrCapabilities, HrResponder, HttpTextGenerator,
    RoleAgentManager, TicketFactory, TicketGenerator,
};
use deskside_core::TextGenerator;
use deskside_infra::queue::{event_types, EventQueue, QueueManager};
use deskside_infra::storage::Storage;
use deskside_infra::workers::{BackgroundWorker, PollingWorker};
use deskside_observability::LogTarget;

use crate::bootstrap::Collaborators;
use crate::config::GameConfig;

const OFFLINE_REPLY: &str =
    "Thanks for reaching out. I have noted your message and will get back to you shortly.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GameConfig::load()?;
    deskside_observability::init(LogTarget::File(config.log_file.clone()))?;
    info!(data_dir = %config.data_dir.display(), "starting deskside");

    let storage = Storage::new(config.storage_config());
    let collaborators = bootstrap::prepare(&storage).await?;

    let events = EventQueue::open(storage.clone()).await?;
    let purged = events
        .purge_older_than(config.queue.purge_after_days)
        .await
        .context("failed to purge old events")?;
    if purged > 0 {
        info!(purged, "purged old events");
    }

    let manager = QueueManager::new(events.clone(), config.queue_manager_config());
    register_builtin_handlers(&manager).await;
    manager.start().await;

    let writer: Option<Arc<dyn TextGenerator>> = match &config.llm.endpoint {
        Some(endpoint) => Some(Arc::new(HttpTextGenerator::new(endpoint.as_str(), config.llm.model.as_str())?)),
        None => {
            info!("no text generation endpoint configured; using canned text");
            None
        }
    };

    let workers = build_workers(&config, &collaborators, &events, writer).await;
    for worker in &workers {
        worker.start().await;
    }

    let role_agents = if config.role_agents.enabled {
        let agents = RoleAgentManager::new(
            Arc::new(collaborators.staff.clone()),
            Arc::new(collaborators.mailbox.clone()),
            config.role_agents.schedule(),
        );
        match agents.start_all().await {
            Ok(started) => info!(started, "role agents started"),
            Err(err) => error!(error = %err, "failed to start role agents"),
        }
        Some(agents)
    } else {
        None
    };

    println!("Deskside is running. Press Ctrl+C to clock out.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown requested");

    for worker in &workers {
        worker.stop().await;
    }
    if let Some(agents) = role_agents {
        agents.stop_all().await;
    }
    manager.stop().await;
    storage.close_pools().await;
    info!("deskside stopped");
    Ok(())
}

async fn register_builtin_handlers(manager: &QueueManager) {
    manager
        .register_handler(event_types::TICKET_SUBMITTED, |event| {
            info!(event_id = %event.id, payload = %event.payload, "ticket submitted");
            Ok(())
        })
        .await;
    manager
        .register_handler(event_types::HARDWARE_FAILURE, |event| {
            warn!(event_id = %event.id, payload = %event.payload, "hardware failure reported");
            Ok(())
        })
        .await;
    manager
        .register_handler(event_types::ADMIN_NOTIFICATION, |event| {
            info!(event_id = %event.id, payload = %event.payload, "admin notification");
            Ok(())
        })
        .await;
    info!(event_types = ?manager.registered_types().await, "event handlers registered");
}

/// Build every enabled worker. A worker that cannot be configured is logged
/// and left out.
async fn build_workers(
    config: &GameConfig,
    collaborators: &Collaborators,
    events: &EventQueue,
    writer: Option<Arc<dyn TextGenerator>>,
) -> Vec<Box<dyn BackgroundWorker>> {
    let mut factory = TicketFactory::new(
        Arc::new(collaborators.tickets.clone()),
        Arc::new(collaborators.hardware.clone()),
    );
    if let Some(writer) = &writer {
        factory = factory.with_writer(writer.clone());
    }

    let mut workers: Vec<Box<dyn BackgroundWorker>> = Vec::new();

    if config.ticket_generator.enabled {
        let generator = TicketGenerator::new(factory.clone())
            .with_floor(config.ticket_generator.floor)
            .with_events(events.clone());
        workers.push(Box::new(PollingWorker::new(generator, config.ticket_generator.schedule())));
    }

    if config.hr_responder.enabled {
        let hr_writer: Arc<dyn TextGenerator> = match &writer {
            Some(writer) => writer.clone(),
            None => Arc::new(CannedTextGenerator::new(OFFLINE_REPLY)),
        };
        match HrResponder::new(
            &config.hr_responder.role,
            Arc::new(collaborators.staff.clone()),
            Arc::new(collaborators.mailbox.clone()),
            hr_writer,
        )
        .await
        {
            Ok(responder) => {
                let responder = responder.with_capabilities(HrCapabilities {
                    message_handling: config.hr_responder.message_handling,
                    employee_concerns: config.hr_responder.employee_concerns,
                });
                workers.push(Box::new(PollingWorker::new(responder, config.hr_responder.schedule())));
            }
            Err(err) => error!(error = %err, "HR responder disabled"),
        }
    }

    if config.customer_agent.enabled {
        let agent = CustomerAgent::new(factory).with_floor(config.ticket_generator.floor);
        workers.push(Box::new(PollingWorker::new(agent, config.customer_agent.schedule())));
    }

    workers
}

//! Session assembly: wires the actuation service to the simulated browser.

use std::sync::Arc;

use steward_action::{
    ActuationService, BlocklistSafetyEvaluator, Collaborators, DetachReason, FanoutJournal,
    Journal, MemoryJournal, ToolController, ToolRegistry, TracingJournal,
};
use steward_core::{EventBus, StewardConfig};

use crate::sim::{self, LoggingHooks, SettleDelay, SimulatedBrowser};

pub struct Session {
    pub service: Arc<ActuationService>,
    pub browser: Arc<SimulatedBrowser>,
    pub journal: Arc<MemoryJournal>,
}

impl Session {
    /// Build a session from `config`. Must be called inside a Tokio runtime.
    pub fn new(config: &StewardConfig) -> steward_core::Result<Self> {
        let browser = Arc::new(SimulatedBrowser::new());

        let journal = Arc::new(MemoryJournal::new(config.engine.journal_capacity));
        let journal_sink: Arc<dyn Journal> = if config.engine.journal_to_log {
            let sinks: Vec<Arc<dyn Journal>> = vec![journal.clone(), Arc::new(TracingJournal)];
            Arc::new(FanoutJournal::new(sinks))
        } else {
            journal.clone()
        };

        let mut registry = ToolRegistry::new();
        sim::register_tools(&mut registry, &browser);
        let tools = ToolController::new(registry, browser.clone(), config.tool.clone())
            .with_stability(Arc::new(SettleDelay::default()));

        let collaborators = Collaborators {
            tabs: browser.clone(),
            safety: Arc::new(BlocklistSafetyEvaluator::from_config(&config.safety)?),
            hooks: Arc::new(LoggingHooks),
            tools: Arc::new(tools),
            journal: journal_sink,
        };
        let events = EventBus::new(config.engine.event_buffer);
        let service = Arc::new(ActuationService::new(collaborators, events));

        spawn_detach_forwarder(&browser, &service);
        spawn_event_logger(&service);

        Ok(Self {
            service,
            browser,
            journal,
        })
    }
}

/// Tell every task when the browser closes a tab.
fn spawn_detach_forwarder(browser: &SimulatedBrowser, service: &Arc<ActuationService>) {
    let mut detached = browser.subscribe_detached();
    let service = Arc::downgrade(service);
    tokio::spawn(async move {
        while let Some(tab) = detached.recv().await {
            let Some(service) = service.upgrade() else {
                break;
            };
            service.on_tab_detached(tab, DetachReason::Delete);
        }
    });
}

fn spawn_event_logger(service: &ActuationService) {
    let mut events = service.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!(target: "steward::events", "{json}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

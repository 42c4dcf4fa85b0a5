use crate::events::DomainEvent;
use crate::hub::Hub;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub events: mpsc::Sender<DomainEvent>, // Feeds the fan-out; drained by `EventFanout::run`
}

impl AppState {
    pub fn new(hub: Hub, events: mpsc::Sender<DomainEvent>) -> Self {
        Self { hub, events }
    }
}

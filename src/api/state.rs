use crate::ingest::Coordinator;
use crate::storage::EventStore;

/// Shared handler state. Cheap to clone; every piece is a handle.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub store: EventStore,
}

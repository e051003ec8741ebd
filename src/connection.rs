use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-client connection state.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    pub should_close: bool,
    pub commands_processed: u64,
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            should_close: false,
            commands_processed: 0,
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        ClientState::new()
    }
}

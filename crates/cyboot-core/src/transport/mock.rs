//! In-memory transport replaying canned device responses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{Transport, TransportError};

#[derive(Debug, Default)]
struct MockState {
    /// Queued responses returned on read.
    responses: VecDeque<Vec<u8>>,
    /// Captured writes.
    writes: Vec<Vec<u8>>,
    open: bool,
    open_count: usize,
    close_count: usize,
    connected: bool,
}

/// Mock transport for exercising channel and session logic.
///
/// Clones share state, so a test can keep a handle while the session owns
/// the transport.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a response to be returned on the next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.state().responses.push_back(bytes.to_vec());
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Simulate the link dropping.
    pub fn disconnect(&self) {
        self.state().connected = false;
    }

    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    pub fn close_count(&self) -> usize {
        self.state().close_count
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::OpenFailed("mock device unplugged".into()));
        }
        state.open = true;
        state.open_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.open = false;
        state.close_count += 1;
        Ok(())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        let mut bytes = state
            .responses
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 100 })?;
        bytes.truncate(max_len);
        Ok(bytes)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }
}

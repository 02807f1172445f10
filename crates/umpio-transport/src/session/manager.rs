use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use super::{Session, SessionState};
use crate::backend::Backend;
use crate::config::TransportConfig;
use crate::endpoint::{Direction, EndpointKey};
use crate::error::Result;
use crate::registry::Registry;

/// Opens, tracks and closes the sessions of one transport.
pub(crate) struct SessionManager<B: Backend> {
    registry: Arc<Registry<B>>,
    config: TransportConfig,
    sessions: DashMap<EndpointKey, Session>,
}

impl<B: Backend> SessionManager<B> {
    pub fn new(registry: Arc<Registry<B>>, config: TransportConfig) -> Self {
        Self {
            registry,
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn open(&self, index: usize, direction: Direction) -> Result<Session> {
        let endpoint = self.registry.resolve(index, direction)?;
        let state = self.registry.claim(&endpoint)?;

        // On failure the session's worker hands the claim back once no
        // native handle is left.
        let session = Session::open(
            Arc::clone(self.registry.backend()),
            endpoint.clone(),
            state,
            &self.config,
        )?;

        self.prune();
        self.sessions.insert(endpoint.key(), session.clone());
        Ok(session)
    }

    /// Close the session on the endpoint currently at `index`, if any.
    pub fn close(&self, index: usize, direction: Direction) -> Result<()> {
        let endpoint = self.registry.resolve(index, direction)?;
        match self.sessions.remove(&endpoint.key()) {
            Some((_, session)) => session.close(),
            None => Ok(()),
        }
    }

    /// Close every session whose endpoint vanished from the catalog.
    ///
    /// Returns how many were closed; the first close failure wins.
    pub fn close_stale(&self) -> Result<usize> {
        let stale: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.state() == SessionState::Stale)
            .map(|s| s.value().clone())
            .collect();

        let mut first_error = None;
        for session in &stale {
            self.sessions.remove(&session.endpoint().key());
            if let Err(e) = session.close() {
                warn!(name = %session.endpoint().name, error = %e, "Closing stale session failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(stale.len()), Err)
    }

    /// Session currently bound to the endpoint at `index`.
    pub fn get(&self, index: usize, direction: Direction) -> Option<Session> {
        self.prune();
        let endpoint = self.registry.resolve(index, direction).ok()?;
        self.sessions.get(&endpoint.key()).map(|s| s.value().clone())
    }

    pub fn open_count(&self) -> usize {
        self.prune();
        self.sessions.len()
    }

    /// Forget sessions closed directly through [`Session::close`].
    fn prune(&self) {
        self.sessions.retain(|_, session| session.is_open());
    }

    /// Close every session. The first failure is returned after all closes
    /// have been attempted.
    pub fn shutdown(&self) -> Result<()> {
        let keys: Vec<EndpointKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut first_error = None;
        let mut closed = 0;

        for key in keys {
            let Some((_, session)) = self.sessions.remove(&key) else {
                continue;
            };
            if !session.is_open() {
                continue;
            }
            closed += 1;
            if let Err(e) = session.close() {
                warn!(name = %session.endpoint().name, error = %e, "Close failed during shutdown");
                first_error.get_or_insert(e);
            }
        }

        info!(closed, "Sessions shut down");
        first_error.map_or(Ok(()), Err)
    }
}

//! Device registry: the cached endpoint catalog and session bookkeeping.
//!
//! Only [`Registry::refresh`] talks to the OS. Lookups read an `ArcSwap`
//! snapshot, so they never block behind a refresh in progress.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::endpoint::{Direction, DiscoveredEndpoint, Endpoint, EndpointKey};
use crate::error::{Error, Result};
use crate::session::{SessionState, StateCell};

/// One enumeration result. Indices are dense and per direction.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    pub outputs: Vec<Endpoint>,
    pub inputs: Vec<Endpoint>,
}

impl Catalog {
    fn build(outputs: Vec<DiscoveredEndpoint>, inputs: Vec<DiscoveredEndpoint>) -> Self {
        let index = |direction: Direction, found: Vec<DiscoveredEndpoint>| -> Vec<Endpoint> {
            found
                .into_iter()
                .enumerate()
                .map(|(index, d)| Endpoint {
                    index,
                    name: d.name,
                    direction,
                    native_id: d.native_id,
                })
                .collect()
        };
        Self {
            outputs: index(Direction::Output, outputs),
            inputs: index(Direction::Input, inputs),
        }
    }

    pub fn endpoints(&self, direction: Direction) -> &[Endpoint] {
        match direction {
            Direction::Output => &self.outputs,
            Direction::Input => &self.inputs,
        }
    }

    /// Size of every same-name group, per direction.
    fn name_groups(&self) -> HashMap<(Direction, String), usize> {
        let mut groups = HashMap::new();
        for endpoint in self.outputs.iter().chain(&self.inputs) {
            if let Some(group) = endpoint.native_id.name_group() {
                *groups.entry((endpoint.direction, group.to_owned())).or_insert(0) += 1;
            }
        }
        groups
    }

    fn keys(&self) -> HashSet<EndpointKey> {
        self.outputs
            .iter()
            .chain(&self.inputs)
            .map(Endpoint::key)
            .collect()
    }
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    generation: u64,
    last: Option<Result<Arc<Catalog>>>,
}

pub(crate) struct Registry<B: Backend> {
    backend: Arc<B>,
    catalog: ArcSwap<Catalog>,
    refresh: Mutex<RefreshState>,
    refreshed: Condvar,
    /// State of every session that is or was open, by endpoint identity.
    sessions: DashMap<EndpointKey, Arc<StateCell>>,
}

impl<B: Backend> Registry<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            catalog: ArcSwap::from_pointee(Catalog::default()),
            refresh: Mutex::new(RefreshState::default()),
            refreshed: Condvar::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.load_full()
    }

    pub fn list(&self, direction: Direction) -> Vec<Endpoint> {
        self.catalog.load().endpoints(direction).to_vec()
    }

    /// Re-enumerate both directions.
    ///
    /// Concurrent callers wait for the refresh already in flight and share
    /// its result instead of enumerating again. On failure the previous
    /// catalog stays in place.
    pub fn refresh(&self) -> Result<Arc<Catalog>> {
        let mut state = self.refresh.lock();
        if state.in_flight {
            let generation = state.generation;
            while state.generation == generation {
                self.refreshed.wait(&mut state);
            }
            return match &state.last {
                Some(result) => result.clone(),
                None => Ok(self.snapshot()),
            };
        }
        state.in_flight = true;
        drop(state);

        let result = self.enumerate();
        if let Ok(catalog) = &result {
            let previous = self.catalog.swap(Arc::clone(catalog));
            self.reconcile(&previous, catalog);
        }

        let mut state = self.refresh.lock();
        state.in_flight = false;
        state.generation += 1;
        state.last = Some(result.clone());
        self.refreshed.notify_all();
        result
    }

    fn enumerate(&self) -> Result<Arc<Catalog>> {
        let outputs = self.backend.enumerate_outputs()?;
        let inputs = self.backend.enumerate_inputs()?;
        let catalog = Catalog::build(outputs, inputs);
        info!(
            backend = self.backend.name(),
            outputs = catalog.outputs.len(),
            inputs = catalog.inputs.len(),
            "Endpoint catalog refreshed"
        );
        Ok(Arc::new(catalog))
    }

    /// Mark sessions whose endpoint disappeared as stale and forget closed
    /// ones.
    ///
    /// When a group of same-name endpoints shrinks there is no telling which
    /// device left, so every session in the group goes stale.
    fn reconcile(&self, previous: &Catalog, catalog: &Catalog) {
        let present = catalog.keys();
        let before = previous.name_groups();
        let after = catalog.name_groups();
        let shrunk = |(direction, id): &EndpointKey| {
            id.name_group().is_some_and(|group| {
                let group = (*direction, group.to_owned());
                after.get(&group).copied().unwrap_or(0) < before.get(&group).copied().unwrap_or(0)
            })
        };

        self.sessions.retain(|key, cell| {
            if (!present.contains(key) || shrunk(key)) && cell.mark_stale() {
                debug!(direction = %key.0, id = key.1.as_str(), "Session endpoint vanished");
            }
            !cell.is_vacant()
        });
    }

    pub fn resolve(&self, index: usize, direction: Direction) -> Result<Endpoint> {
        self.catalog
            .load()
            .endpoints(direction)
            .get(index)
            .cloned()
            .ok_or(Error::DeviceNotFound { direction, index })
    }

    /// First endpoint whose name contains `name`, ignoring case.
    pub fn find(&self, direction: Direction, name: &str) -> Option<Endpoint> {
        let needle = name.to_lowercase();
        self.catalog
            .load()
            .endpoints(direction)
            .iter()
            .find(|e| e.name.to_lowercase().contains(&needle))
            .cloned()
    }

    /// Reserve `endpoint` for a new session.
    ///
    /// Fails with [`Error::AlreadyOpen`] while another session holds it,
    /// including a stale one that was never closed.
    pub fn claim(&self, endpoint: &Endpoint) -> Result<Arc<StateCell>> {
        let already_open = || Error::AlreadyOpen {
            direction: endpoint.direction,
            name: endpoint.name.clone(),
        };
        match self.sessions.entry(endpoint.key()) {
            Entry::Occupied(entry) => {
                if entry.get().try_open() {
                    Ok(Arc::clone(entry.get()))
                } else {
                    Err(already_open())
                }
            }
            Entry::Vacant(entry) => {
                let cell = Arc::new(StateCell::open());
                entry.insert(Arc::clone(&cell));
                Ok(cell)
            }
        }
    }

    pub fn state_of(&self, endpoint: &Endpoint) -> SessionState {
        self.sessions
            .get(&endpoint.key())
            .map_or(SessionState::Closed, |cell| cell.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;

    fn registry() -> (VirtualBackend, Registry<VirtualBackend>) {
        let backend = VirtualBackend::new();
        let registry = Registry::new(Arc::new(backend.clone()));
        (backend, registry)
    }

    #[test]
    fn test_empty_catalog_before_refresh() {
        let (backend, registry) = registry();
        backend.add_output("Synth");
        assert!(registry.list(Direction::Output).is_empty());
        registry.refresh().unwrap();
        assert_eq!(registry.list(Direction::Output).len(), 1);
    }

    #[test]
    fn test_dense_indices_after_removal() {
        let (backend, registry) = registry();
        let a = backend.add_output("A");
        backend.add_output("B");
        backend.add_output("C");
        registry.refresh().unwrap();

        backend.remove(&a);
        registry.refresh().unwrap();
        let listed = registry.list(Direction::Output);
        let summary: Vec<_> = listed.iter().map(|e| (e.index, e.name.as_str())).collect();
        assert_eq!(summary, vec![(0, "B"), (1, "C")]);
    }

    #[test]
    fn test_resolve_out_of_range() {
        let (backend, registry) = registry();
        backend.add_input("Keys");
        registry.refresh().unwrap();

        assert_eq!(registry.resolve(0, Direction::Input).unwrap().name, "Keys");
        assert!(matches!(
            registry.resolve(1, Direction::Input),
            Err(Error::DeviceNotFound {
                direction: Direction::Input,
                index: 1
            })
        ));
        assert!(registry.resolve(0, Direction::Output).is_err());
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let (backend, registry) = registry();
        backend.add_output("Midi Through Port-0");
        backend.add_output("USB Synth");
        registry.refresh().unwrap();

        assert_eq!(
            registry.find(Direction::Output, "usb").map(|e| e.index),
            Some(1)
        );
        assert!(registry.find(Direction::Output, "missing").is_none());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (backend, registry) = registry();
        backend.add_output("Synth");
        registry.refresh().unwrap();
        let endpoint = registry.resolve(0, Direction::Output).unwrap();

        let cell = registry.claim(&endpoint).unwrap();
        assert!(matches!(
            registry.claim(&endpoint),
            Err(Error::AlreadyOpen { .. })
        ));

        cell.release();
        assert!(registry.claim(&endpoint).is_ok());
    }

    #[test]
    fn test_refresh_marks_vanished_sessions_stale() {
        let (backend, registry) = registry();
        let id = backend.add_output("Synth");
        backend.add_output("Other");
        registry.refresh().unwrap();
        let endpoint = registry.resolve(0, Direction::Output).unwrap();
        let other = registry.resolve(1, Direction::Output).unwrap();
        let cell = registry.claim(&endpoint).unwrap();
        let other_cell = registry.claim(&other).unwrap();

        backend.remove(&id);
        registry.refresh().unwrap();
        assert_eq!(cell.get(), SessionState::Stale);
        assert_eq!(other_cell.get(), SessionState::Open);
    }

    /// Identifies endpoints by display name only, as WinMM does.
    #[derive(Default)]
    struct NameKeyedBackend {
        outputs: Mutex<Vec<&'static str>>,
    }

    impl Backend for NameKeyedBackend {
        type Handle = ();

        fn name(&self) -> &'static str {
            "name-keyed"
        }

        fn enumerate_outputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
            let names = self.outputs.lock().clone();
            let ids = crate::endpoint::name_occurrence_ids(names.iter().copied());
            Ok(names
                .into_iter()
                .zip(ids)
                .map(|(name, id)| DiscoveredEndpoint::new(name, id))
                .collect())
        }

        fn enumerate_inputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
            Ok(Vec::new())
        }

        fn open(&self, _endpoint: &Endpoint) -> Result<()> {
            Ok(())
        }

        fn close(&self, _handle: ()) -> Result<()> {
            Ok(())
        }

        fn send(&self, _handle: &mut (), _packet: &umpio_codec::UmpPacket) -> Result<()> {
            Ok(())
        }

        fn poll_receive(
            &self,
            _handle: &mut (),
            _wait: std::time::Duration,
        ) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[test]
    fn test_shrinking_name_group_marks_every_member_stale() {
        let backend = Arc::new(NameKeyedBackend::default());
        *backend.outputs.lock() = vec!["Synth", "Synth", "Keys"];
        let registry = Registry::new(Arc::clone(&backend));
        registry.refresh().unwrap();

        let first = registry.claim(&registry.resolve(0, Direction::Output).unwrap()).unwrap();
        let second = registry.claim(&registry.resolve(1, Direction::Output).unwrap()).unwrap();
        let keys = registry.claim(&registry.resolve(2, Direction::Output).unwrap()).unwrap();

        // One of the two synths is unplugged; the ids alone cannot say which.
        *backend.outputs.lock() = vec!["Synth", "Keys"];
        registry.refresh().unwrap();
        assert_eq!(first.get(), SessionState::Stale);
        assert_eq!(second.get(), SessionState::Stale);
        assert_eq!(keys.get(), SessionState::Open);
    }

    #[test]
    fn test_released_cell_is_pruned_but_releasing_cell_is_kept() {
        let (backend, registry) = registry();
        backend.add_output("A");
        backend.add_output("B");
        registry.refresh().unwrap();
        let a = registry.resolve(0, Direction::Output).unwrap();
        let b = registry.resolve(1, Direction::Output).unwrap();

        let released = registry.claim(&a).unwrap();
        released.begin_release();
        released.release();
        let releasing = registry.claim(&b).unwrap();
        releasing.begin_release();

        registry.refresh().unwrap();
        assert!(registry.claim(&a).is_ok());
        assert!(matches!(registry.claim(&b), Err(Error::AlreadyOpen { .. })));
    }
}

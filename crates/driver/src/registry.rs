//! Registry of attached sessions
//!
//! The registry owns every live [`DeviceSession`]. Handles and interrupt
//! callbacks only hold weak references, so unlinking a session here is what
//! ends its life once detach has flushed the transport.
//!
//! One lock guards the session list and the cached name table. It is never
//! held while a session lock is taken.

use crate::error::{DriverError, Result};
use crate::handle::View;
use crate::session::DeviceSession;
use common::{DeviceId, DeviceSummary};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Default)]
struct RegistryInner {
    /// Most recently attached first
    sessions: VecDeque<Arc<DeviceSession>>,
    /// Published names, rebuilt after the list changes
    names: Option<Arc<[String]>>,
}

/// Process-wide list of attached sessions
pub struct Registry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

impl Registry {
    /// Registry holding at most `capacity` sessions
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a session at the head of the list
    pub fn attach(&self, session: Arc<DeviceSession>) -> Result<()> {
        let mut inner = self.lock();
        if inner.sessions.len() >= self.capacity {
            return Err(DriverError::AllocationFailure(format!(
                "registry full ({} devices)",
                self.capacity
            )));
        }
        if inner.sessions.iter().any(|s| s.id() == session.id()) {
            return Err(DriverError::StateInvalid("device already attached"));
        }

        debug!(
            "Add instance {} ({} attached)",
            session.id(),
            inner.sessions.len() + 1
        );
        inner.sessions.push_front(session);
        inner.names = None;
        Ok(())
    }

    /// Unlink a session, returning it to the caller
    pub fn detach(&self, id: DeviceId) -> Option<Arc<DeviceSession>> {
        let mut inner = self.lock();
        let position = inner.sessions.iter().position(|s| s.id() == id)?;
        let session = inner.sessions.remove(position)?;
        inner.names = None;

        debug!(
            "Remove instance {} ({} attached)",
            id,
            inner.sessions.len()
        );
        Some(session)
    }

    /// Look up a session by device id
    pub fn get(&self, id: DeviceId) -> Option<Arc<DeviceSession>> {
        self.lock().sessions.iter().find(|s| s.id() == id).cloned()
    }

    /// Published names, two per session in list order
    ///
    /// The returned table stays valid and unchanged until the next attach
    /// or detach.
    pub fn publish_names(&self) -> Arc<[String]> {
        let mut inner = self.lock();
        if let Some(names) = &inner.names {
            return names.clone();
        }

        let names: Arc<[String]> = inner
            .sessions
            .iter()
            .flat_map(|s| [s.names().counter.clone(), s.names().animation.clone()])
            .collect();
        trace!("Published {} names", names.len());
        inner.names = Some(names.clone());
        names
    }

    /// Find the session publishing `name` and the view it names
    pub fn resolve(&self, name: &str) -> Result<(Arc<DeviceSession>, View)> {
        let inner = self.lock();
        inner
            .sessions
            .iter()
            .find_map(|s| {
                let names = s.names();
                if names.counter == name {
                    Some((s.clone(), View::Counter))
                } else if names.animation == name {
                    Some((s.clone(), View::Animation))
                } else {
                    None
                }
            })
            .ok_or_else(|| DriverError::DeviceNotFound(name.to_string()))
    }

    /// Number of attached sessions
    pub fn count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Snapshot of every session, most recent first
    pub fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.lock().sessions.iter().cloned().collect()
    }

    /// Listing of every session, most recent first
    pub fn summaries(&self) -> Vec<DeviceSummary> {
        // Session locks are taken after the registry lock is released
        self.sessions().iter().map(|s| s.summary()).collect()
    }
}

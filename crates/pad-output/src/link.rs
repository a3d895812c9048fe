//! Guarded current state plus transport
//!
//! Immediate sends and keep-alive resends both go through [`Link`], so the
//! encode-and-write of a state always happens under the same lock that
//! mutates it.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use crate::backend::{BackendError, BackendResult};
use crate::state::ButtonState;

/// Encodes and writes one state snapshot
pub(crate) trait Transport: Send + 'static {
    fn send(&mut self, state: &ButtonState) -> io::Result<()>;
}

struct Inner<T> {
    state: ButtonState,
    transport: Option<T>,
}

/// Shared handle to the guarded state; clones refer to the same link
pub(crate) struct Link<T> {
    backend: &'static str,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Link<T> {
    pub(crate) fn new(backend: &'static str) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(Inner {
                state: ButtonState::neutral(),
                transport: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a transport and send the current state through it
    pub(crate) fn attach(&self, transport: T) {
        let mut inner = self.lock();
        inner.transport = Some(transport);
        Self::transmit(self.backend, &mut inner);
    }

    /// Detach the transport, returning it
    pub(crate) fn detach(&self) -> Option<T> {
        self.lock().transport.take()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.lock().transport.is_some()
    }

    pub(crate) fn snapshot(&self) -> ButtonState {
        self.lock().state.clone()
    }

    /// Mutate the state and transmit it without releasing the lock
    pub(crate) fn update(&self, change: &mut dyn FnMut(&mut ButtonState)) -> BackendResult<()> {
        let mut inner = self.lock();
        if inner.transport.is_none() {
            return Err(BackendError::NotConnected {
                backend: self.backend,
            });
        }
        change(&mut inner.state);
        Self::transmit(self.backend, &mut inner);
        Ok(())
    }

    /// Resend the current state; returns false once no transport remains
    pub(crate) fn resend(&self) -> bool {
        let mut inner = self.lock();
        Self::transmit(self.backend, &mut inner)
    }

    /// Run `f` against the transport while holding the lock
    pub(crate) fn with_transport<R>(
        &self,
        f: impl FnOnce(&mut T) -> io::Result<R>,
    ) -> BackendResult<R> {
        let mut inner = self.lock();
        let transport = inner.transport.as_mut().ok_or(BackendError::NotConnected {
            backend: self.backend,
        })?;
        Ok(f(transport)?)
    }

    fn transmit(backend: &'static str, inner: &mut Inner<T>) -> bool {
        let Inner { state, transport } = inner;
        let Some(t) = transport.as_mut() else {
            return false;
        };
        match t.send(state) {
            Ok(()) => {
                trace!(backend, "state transmitted");
                true
            }
            Err(e) => {
                warn!(backend, error = %e, "transport write failed, marking disconnected");
                *transport = None;
                false
            }
        }
    }
}

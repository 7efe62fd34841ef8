//! Tracing session lifecycle
//!
//! A session owns the tracer (and with it the state store, sink and ring) and
//! the instrumentation host. Probes are attached all-or-nothing; detaching
//! stops dispatch before the host tears the probes down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::{AttachError, Diagnostics, InstrumentationHost, ProbeAdapter};
use crate::tools::Tracer;

/// Producer-side entry point into a session; cheap to clone into reader tasks
#[derive(Clone)]
pub struct SessionHandle {
    tracer: Arc<dyn Tracer>,
    adapter: Arc<ProbeAdapter>,
    active: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Decode one probe sample and dispatch it
    pub fn ingest(&self, bytes: &[u8]) {
        if !self.is_active() {
            return;
        }
        if let Some(event) = self.adapter.normalize(bytes) {
            self.tracer.handle(&event);
        }
    }

    /// Account samples lost between the kernel and the reader
    pub fn record_lost(&self, count: usize) {
        if count > 0 {
            debug!("Lost {} probe records", count);
            self.adapter.record_lost(count);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.tracer.as_ref()
    }

    /// Tracer counters plus the adapter's decode and loss counters
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            decode_dropped: self.adapter.decode_dropped(),
            lost_records: self.adapter.lost(),
            ..self.tracer.diagnostics()
        }
    }
}

pub struct Session {
    host: Box<dyn InstrumentationHost>,
    handle: SessionHandle,
    attached: bool,
}

impl Session {
    pub fn new(tracer: Arc<dyn Tracer>, host: Box<dyn InstrumentationHost>) -> Self {
        Self {
            host,
            handle: SessionHandle {
                tracer,
                adapter: Arc::new(ProbeAdapter::new()),
                active: Arc::new(AtomicBool::new(false)),
            },
            attached: false,
        }
    }

    /// Attach every probe the tracer needs.
    ///
    /// On the first failure everything attached so far is detached again and
    /// the error is returned; there is no partial session.
    pub fn attach(&mut self) -> Result<(), AttachError> {
        if self.attached {
            warn!("Session already attached");
            return Ok(());
        }

        let tracer = self.handle.tracer.clone();
        info!(
            "Attaching {} probes for {}",
            tracer.probes().len(),
            tracer.kind()
        );

        for &point in tracer.probes() {
            if let Err(e) = self.host.attach(point) {
                self.host.detach_all();
                return Err(e);
            }
            debug!("Attached {}", point);
        }

        self.handle.active.store(true, Ordering::Release);
        self.attached = true;
        info!("Tracing started");

        Ok(())
    }

    /// Stop dispatch and detach all probes
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }

        self.handle.active.store(false, Ordering::Release);
        self.host.detach_all();
        self.attached = false;
        info!("Tracing stopped");
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.handle.tracer()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.handle.diagnostics()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach();
    }
}

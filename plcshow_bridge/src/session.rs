//! PLC session: the single owner of the live link.
//!
//! The operator connects and disconnects; the poll loop borrows the link for
//! the duration of one tick through [`PlcSession::with_link`]. Both go through
//! the same lock, so a connect/disconnect transition can never land between
//! the control-byte read and the feedback write of a tick.

use parking_lot::Mutex;
use plcshow_common::link::{ConnectError, PlcConnector, PlcEndpoint, PlcLink};
use plcshow_common::status::{StatusEvent, StatusPublisher};
use tracing::{debug, info, warn};

/// Connection state for one controller.
pub struct PlcSession {
    /// Driver used to open links
    connector: Box<dyn PlcConnector>,
    /// Open link, if any
    link: Mutex<Option<Box<dyn PlcLink>>>,
    /// Connected/Disconnected notifications
    status: StatusPublisher,
}

impl PlcSession {
    /// Create a disconnected session around `connector`.
    pub fn new(connector: Box<dyn PlcConnector>, status: StatusPublisher) -> Self {
        Self {
            connector,
            link: Mutex::new(None),
            status,
        }
    }

    /// Driver name of the underlying connector.
    pub fn driver_name(&self) -> &'static str {
        self.connector.driver_name()
    }

    /// Open the link.
    ///
    /// # Errors
    /// `ConnectError::AlreadyConnected` if a link is open, otherwise whatever
    /// the connector reports. Failures are never retried here.
    pub fn connect(&self, endpoint: &PlcEndpoint) -> Result<(), ConnectError> {
        let mut slot = self.link.lock();
        if slot.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }

        info!(
            "Connecting to {}:{} (rack {}, slot {}) via {}",
            endpoint.host,
            endpoint.port,
            endpoint.rack,
            endpoint.slot,
            self.connector.driver_name()
        );
        let link = self.connector.connect(endpoint)?;
        *slot = Some(link);
        drop(slot);

        info!("PLC connected");
        self.status.publish(StatusEvent::Connected {
            driver: self.connector.driver_name(),
        });
        Ok(())
    }

    /// Close the link. Idempotent.
    pub fn disconnect(&self) {
        let link = self.link.lock().take();
        match link {
            Some(mut link) => {
                link.disconnect();
                info!("PLC disconnected");
                self.status.publish(StatusEvent::Disconnected);
            }
            None => debug!("Disconnect requested while not connected"),
        }
    }

    /// Whether a link is open.
    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Run `f` against the open link, holding it for the whole call.
    ///
    /// Returns `None` without calling `f` when disconnected. If the link
    /// closed itself during `f`, it is released and `Disconnected` published.
    pub fn with_link<R>(&self, f: impl FnOnce(&mut dyn PlcLink) -> R) -> Option<R> {
        let mut slot = self.link.lock();
        let link = slot.as_mut()?;
        let result = f(link.as_mut());
        if !link.is_open() {
            if let Some(mut lost) = slot.take() {
                lost.disconnect();
            }
            drop(slot);
            warn!("PLC connection lost; 'connect' to reopen");
            self.status.publish(StatusEvent::Disconnected);
        }
        Some(result)
    }
}

impl Drop for PlcSession {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.get_mut().take() {
            link.disconnect();
        }
    }
}

//! # Command Router
//!
//! Takes ownership of each decoded packet, consults the [`SessionAuthority`]
//! for controlled services, runs the handler and sends whatever it produced.
//! The packet is dropped when [`Router::route`] returns, whatever the outcome.
//!
//! Handlers are synchronous. They may block inside a backend capability; that
//! only delays the connection that sent the command.
//!
//! Controlled commands hold the control gate shared from the privilege check
//! until their handler returns, and control handshakes hold it exclusively.
//! A command that passed the check therefore finishes before any demotion
//! takes effect, and a handshake waits for in-flight commands.
//!
//! ## Failure handling
//! | error                    | answer                          |
//! |--------------------------|---------------------------------|
//! | framing (`handle_frame`) | nothing                         |
//! | fixed-size payload       | `InvalidPacket` to sender       |
//! | malformed text           | nothing                         |
//! | no control               | `NoPrivilege` to sender         |
//! | backend                  | `Fail` to sender                |
//! | unknown service          | `Fail` to sender                |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tracing::{debug, error, info, instrument, warn};

use crate::config::TelescopeConfig;
use crate::core::packet::Packet;
use crate::driver::{DriverTable, HorizonProfile};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::authority::{ConnectionId, SessionAuthority};
use crate::protocol::handlers;
use crate::protocol::handshake::ControlKeys;
use crate::protocol::message::{encode_text, AcquisitionConfig, SpectrumData};
use crate::protocol::service::{PrivilegeClass, Service};
use crate::transport::Transport;
use crate::utils::metrics::{Metrics, Timer};

/// Transaction id used for unsolicited announcements.
pub const UNSOLICITED_TRANSACTION: u16 = 0;

/// Handler signature: read the request, act, describe the reply.
pub type HandlerFn = dyn Fn(&Router, &Request<'_>) -> Result<Reply> + Send + Sync + 'static;

/// A decoded request as seen by a handler.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub connection: ConnectionId,
    pub service: Service,
    pub transaction_id: u16,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Sender,
    Everyone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub target: Target,
    pub service: Service,
    pub payload: Vec<u8>,
}

/// Packets a handler wants sent, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    outgoing: Vec<Outgoing>,
}

impl Reply {
    pub fn silent() -> Self {
        Self::default()
    }

    /// Empty-payload acknowledgement to the sender.
    pub fn ack(service: Service) -> Self {
        Self::to_sender(service, Vec::new())
    }

    pub fn to_sender(service: Service, payload: Vec<u8>) -> Self {
        Self::silent().then(Target::Sender, service, payload)
    }

    pub fn broadcast(service: Service, payload: Vec<u8>) -> Self {
        Self::silent().then(Target::Everyone, service, payload)
    }

    pub fn then(mut self, target: Target, service: Service, payload: Vec<u8>) -> Self {
        self.outgoing.push(Outgoing {
            target,
            service,
            payload,
        });
        self
    }

    pub fn then_broadcast(self, service: Service, payload: Vec<u8>) -> Self {
        self.then(Target::Everyone, service, payload)
    }

    pub fn outgoing(&self) -> &[Outgoing] {
        &self.outgoing
    }

    pub fn is_silent(&self) -> bool {
        self.outgoing.is_empty()
    }
}

/// Handler tables, one per privilege class.
pub struct Dispatcher {
    open: HashMap<Service, Box<HandlerFn>>,
    controlled: HashMap<Service, Box<HandlerFn>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// An empty dispatcher. Every service is "not understood".
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
            controlled: HashMap::new(),
        }
    }

    /// A dispatcher with a handler for every catalog service.
    pub fn with_default_handlers() -> Self {
        let mut dispatcher = Self::new();
        handlers::register_defaults(&mut dispatcher);
        dispatcher
    }

    /// Register a handler in the table for the service's privilege class.
    /// A later registration replaces an earlier one.
    pub fn register<F>(&mut self, service: Service, handler: F)
    where
        F: Fn(&Router, &Request<'_>) -> Result<Reply> + Send + Sync + 'static,
    {
        let table = match service.privilege_class() {
            PrivilegeClass::Open => &mut self.open,
            PrivilegeClass::Controlled => &mut self.controlled,
        };
        table.insert(service, Box::new(handler));
    }

    pub fn handles(&self, service: Service) -> bool {
        self.open.contains_key(&service) || self.controlled.contains_key(&service)
    }
}

/// Static facts about the station, used in capability replies.
#[derive(Debug, Clone, Default)]
pub struct StationProfile {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub video_uri: Option<String>,
    pub horizon: HorizonProfile,
}

#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    /// Log and count frames whose integrity field does not match. Such frames
    /// are processed regardless.
    pub log_checksum_mismatch: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            log_checksum_mismatch: true,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AcquisitionState {
    pub(crate) config: Option<AcquisitionConfig>,
    pub(crate) active: bool,
    /// Spectra published since the last enable.
    pub(crate) published: u32,
}

impl AcquisitionState {
    pub(crate) fn start(&mut self) {
        self.active = true;
        self.published = 0;
    }

    /// Count a published spectrum; returns true when the configured block
    /// limit has now been reached.
    fn record_published(&mut self) -> bool {
        self.published = self.published.saturating_add(1);
        match self.config {
            Some(config) if config.acquisition_limit != 0 => {
                self.published >= config.acquisition_limit
            }
            _ => false,
        }
    }
}

pub struct Router {
    authority: Arc<SessionAuthority>,
    drivers: Arc<DriverTable>,
    station: StationProfile,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    acquisition: Mutex<AcquisitionState>,
    control_gate: RwLock<()>,
    metrics: Arc<Metrics>,
    options: RouterOptions,
}

impl Router {
    pub fn new(
        station: StationProfile,
        authority: Arc<SessionAuthority>,
        drivers: Arc<DriverTable>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            authority,
            drivers,
            station,
            transport,
            dispatcher: Dispatcher::with_default_handlers(),
            acquisition: Mutex::new(AcquisitionState::default()),
            control_gate: RwLock::new(()),
            metrics: Arc::new(Metrics::new()),
            options: RouterOptions::default(),
        }
    }

    /// Build a router from configuration: control keys, station facts and the
    /// horizon profile all come from `config`.
    pub fn from_config(
        config: &TelescopeConfig,
        drivers: Arc<DriverTable>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let station_cfg = &config.station;
        let keys = ControlKeys::new(
            config.auth.shared_secret.as_bytes(),
            &station_cfg.station_id,
            config.auth.master_key.as_deref(),
        )?;

        let horizon = match &station_cfg.horizon_file {
            Some(path) => HorizonProfile::from_file(path)?,
            None => HorizonProfile::default(),
        };

        let station = StationProfile {
            station_id: station_cfg.station_id.clone(),
            latitude: station_cfg.latitude,
            longitude: station_cfg.longitude,
            altitude: station_cfg.altitude,
            video_uri: station_cfg.video_uri.clone(),
            horizon,
        };

        let authority = Arc::new(SessionAuthority::new(keys));
        Ok(Self::new(station, authority, drivers, transport).with_options(RouterOptions {
            log_checksum_mismatch: config.server.log_checksum_mismatch,
        }))
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_options(mut self, options: RouterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn authority(&self) -> &SessionAuthority {
        &self.authority
    }

    pub fn drivers(&self) -> &DriverTable {
        &self.drivers
    }

    pub fn station(&self) -> &StationProfile {
        &self.station
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn acquisition(&self) -> Result<MutexGuard<'_, AcquisitionState>> {
        self.acquisition
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    fn command_gate(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.control_gate
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Exclusive hold on the control gate, for changes of controller.
    pub(crate) fn handover_gate(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.control_gate
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Whether the spectrometer was started through the protocol and has
    /// neither been stopped nor reached its configured block limit.
    pub fn acquisition_active(&self) -> bool {
        self.acquisition().map(|a| a.active).unwrap_or(false)
    }

    /// Register a new connection and announce the updated user list.
    pub fn open_session(&self, connection: ConnectionId, peer: impl Into<String>) -> Result<()> {
        self.authority.connect(connection, peer)?;
        self.metrics.connection_established();
        self.announce_users()
    }

    /// Forget a connection, releasing control if it held it.
    pub fn close_session(&self, connection: ConnectionId) -> Result<()> {
        {
            let _gate = self.handover_gate()?;
            self.authority.disconnect(connection)?;
        }
        self.metrics.connection_closed();
        self.announce_users()
    }

    /// Decode a raw frame and route it. A frame whose declared length does
    /// not match the bytes supplied is dropped without any answer.
    pub fn handle_frame(&self, connection: ConnectionId, frame: &[u8]) {
        match Packet::decode(frame) {
            Ok(packet) => self.route(connection, packet),
            Err(e) => {
                self.metrics.framing_error();
                warn!(connection, error = %e, "Dropping malformed frame");
            }
        }
    }

    /// Route one packet. Takes ownership; the packet is released on return.
    #[instrument(
        skip(self, packet),
        fields(service = packet.service, transaction_id = packet.transaction_id)
    )]
    pub fn route(&self, connection: ConnectionId, packet: Packet) {
        let _timer = Timer::start("route");
        self.metrics
            .packet_received(packet.payload_length() as u64);

        if self.options.log_checksum_mismatch && !packet.checksum_matches() {
            self.metrics.checksum_mismatch();
            warn!(
                connection,
                integrity = packet.integrity,
                "Payload checksum mismatch, processing anyway"
            );
        }

        let transaction_id = packet.transaction_id;
        match self.dispatch(connection, &packet) {
            Ok(reply) => self.deliver(connection, transaction_id, reply),
            Err(e) => self.answer_error(connection, transaction_id, e),
        }
    }

    fn dispatch(&self, connection: ConnectionId, packet: &Packet) -> Result<Reply> {
        let Some(service) = Service::from_u16(packet.service) else {
            return Err(ProtocolError::UnknownService(packet.service));
        };

        let request = Request {
            connection,
            service,
            transaction_id: packet.transaction_id,
            payload: &packet.payload,
        };

        if let Some(handler) = self.dispatcher.open.get(&service) {
            return handler(self, &request);
        }

        if service.is_controlled() {
            let _gate = self.command_gate()?;
            if !self.authority.is_privileged(connection)? {
                return Err(ProtocolError::NoPrivilege(service.id()));
            }
            if let Some(handler) = self.dispatcher.controlled.get(&service) {
                return handler(self, &request);
            }
            warn!(connection, %service, "No handler registered for controlled service");
            return Ok(Reply::silent());
        }

        Err(ProtocolError::UnknownService(service.id()))
    }

    fn answer_error(&self, connection: ConnectionId, transaction_id: u16, err: ProtocolError) {
        let ack = match &err {
            ProtocolError::InvalidPayload { .. } => {
                self.metrics.invalid_packet();
                warn!(connection, error = %err, "Rejecting invalid payload");
                Some(Service::InvalidPacket)
            }
            ProtocolError::MalformedText(reason) => {
                self.metrics.silent_drop();
                debug!(connection, reason, "Dropping malformed text payload");
                None
            }
            ProtocolError::NoPrivilege(_) => {
                self.metrics.privilege_denied();
                info!(connection, error = %err, "Command refused");
                Some(Service::NoPrivilege)
            }
            ProtocolError::Driver(e) => {
                self.metrics.backend_failure();
                warn!(connection, error = %e, "Backend command failed");
                Some(Service::Fail)
            }
            ProtocolError::UnknownService(_) => {
                self.metrics.unknown_service();
                debug!(connection, error = %err, "Service not understood");
                Some(Service::Fail)
            }
            _ => {
                error!(connection, error = %err, "Command processing failed");
                Some(Service::Fail)
            }
        };

        if let Some(service) = ack {
            self.deliver(connection, transaction_id, Reply::ack(service));
        }
    }

    fn deliver(&self, connection: ConnectionId, transaction_id: u16, reply: Reply) {
        for out in reply.outgoing {
            let frame = Bytes::from(Packet::encode(out.service.id(), transaction_id, &out.payload));
            let len = frame.len() as u64;

            let sent = match out.target {
                Target::Sender => self.transport.send_to(connection, frame),
                Target::Everyone => self.transport.send(frame),
            };

            match sent {
                Ok(()) => self.metrics.packet_sent(len),
                Err(e) => warn!(connection, service = %out.service, error = %e, "Send failed"),
            }
        }
    }

    fn announce_users(&self) -> Result<()> {
        let users = self.authority.user_list()?;
        self.deliver(
            0,
            UNSOLICITED_TRANSACTION,
            Reply::broadcast(Service::UserList, encode_text(&users)),
        );
        Ok(())
    }

    /// Broadcast a spectrum to every connection.
    pub fn publish_spectrum(&self, spectrum: &SpectrumData) {
        self.metrics.spectrum_published();
        self.deliver(
            0,
            UNSOLICITED_TRANSACTION,
            Reply::broadcast(Service::SpectrumData, spectrum.to_payload()),
        );
    }

    /// Fetch the next spectrum from the backend while acquisition is active
    /// and publish it. Returns whether a spectrum was published.
    pub fn poll_acquisition(&self) -> Result<bool> {
        if !self.acquisition_active() {
            return Ok(false);
        }

        let Some(spectrum) = self.drivers.read_spectrum()? else {
            return Ok(false);
        };

        debug!(points = spectrum.samples.len(), "Publishing spectrum");
        self.publish_spectrum(&spectrum);

        let mut acquisition = self.acquisition()?;
        if acquisition.active && acquisition.record_published() {
            acquisition.active = false;
            info!(blocks = acquisition.published, "Acquisition limit reached");
        }
        Ok(true)
    }
}

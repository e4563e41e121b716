// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::core::packet::Packet;
use crate::driver::simulator::SimulatedTelescope;
use crate::driver::{Binding, DriverTable, StaticModule};
use crate::error::Result;
use crate::protocol::authority::{ConnectionId, Privilege, SessionAuthority};
use crate::protocol::dispatcher::{Dispatcher, Reply, Request, Router, StationProfile};
use crate::protocol::handshake::{control_digest, ControlKeys};
use crate::protocol::message::{
    decode_text, encode_text, AcquisitionConfig, AzEl, Capabilities, FixedPayload, SpectrumData,
    MAX_TEXT_LEN,
};
use crate::protocol::service::Service;
use crate::transport::Transport;

const SECRET: &[u8] = b"dish-secret";
const STATION: &str = "salsa-vale";
const MASTER: &str = "observatory-master";

const A: ConnectionId = 1;
const B: ConnectionId = 2;

/// Where a recorded frame went: `None` is a broadcast.
type Sent = (Option<ConnectionId>, Packet);

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: Bytes) -> Result<()> {
        self.sent.lock().unwrap().push((None, Packet::decode(&frame)?));
        Ok(())
    }

    fn send_to(&self, connection: ConnectionId, frame: Bytes) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((Some(connection), Packet::decode(&frame)?));
        Ok(())
    }
}

fn station() -> StationProfile {
    StationProfile {
        station_id: STATION.into(),
        latitude: 57.39,
        longitude: 11.92,
        altitude: 20,
        video_uri: None,
        horizon: Default::default(),
    }
}

fn router_with(drivers: DriverTable) -> (Router, Arc<RecordingTransport>) {
    let keys = ControlKeys::new(SECRET, STATION, Some(MASTER)).unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let router = Router::new(
        station(),
        Arc::new(SessionAuthority::new(keys)),
        Arc::new(drivers),
        transport.clone(),
    );
    router.open_session(A, "10.0.0.1:5000").unwrap();
    router.open_session(B, "10.0.0.2:5000").unwrap();
    transport.take();
    (router, transport)
}

fn simulated_router() -> (Router, Arc<RecordingTransport>) {
    let sim = Arc::new(SimulatedTelescope::default());
    let mut drivers = DriverTable::new();
    drivers.load_module(&sim.module());
    router_with(drivers)
}

fn send(router: &Router, connection: ConnectionId, service: Service, payload: Vec<u8>) {
    router.route(connection, Packet::new(service.id(), 7, payload));
}

fn take_control(router: &Router, connection: ConnectionId) {
    let digest = control_digest(SECRET, STATION).unwrap();
    send(router, connection, Service::Control, encode_text(&digest));
}

fn acks_to(sent: &[Sent], connection: ConnectionId) -> Vec<u16> {
    sent.iter()
        .filter(|(to, _)| *to == Some(connection))
        .map(|(_, p)| p.service)
        .collect()
}

#[test]
fn fixed_payload_of_wrong_size_is_answered_with_invalid_packet() {
    let (router, transport) = simulated_router();
    take_control(&router, A);
    transport.take();

    send(&router, A, Service::MoveAzEl, vec![0u8; 7]);

    let sent = transport.take();
    assert_eq!(acks_to(&sent, A), vec![Service::InvalidPacket.id()]);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.payload.is_empty());
    assert_eq!(router.metrics().snapshot().invalid_packets, 1);
}

#[test]
fn malformed_text_is_dropped_silently() {
    let (router, transport) = simulated_router();
    send(&router, A, Service::Nickname, encode_text("vega"));
    take_control(&router, A);
    transport.take();
    let users = router.authority().user_list().unwrap();

    // declared 5, carries 4
    send(&router, A, Service::Message, vec![0x00, 0x05, b'a', b'b', b'c', b'd']);
    // embedded NUL
    send(&router, A, Service::Nickname, vec![0x00, 0x03, b'a', 0, b'b']);
    // invalid UTF-8
    send(&router, A, Service::Nickname, vec![0x00, 0x02, 0xC3, 0x28]);
    // digest too short for its declared length
    send(&router, A, Service::Control, vec![0x00, 0x40, b'f']);

    assert!(transport.take().is_empty());
    assert_eq!(router.metrics().snapshot().silent_drops, 4);
    assert_eq!(router.authority().display_name(A).unwrap(), "vega");
    assert_eq!(router.authority().user_list().unwrap(), users);
    assert_eq!(router.authority().privilege(A).unwrap(), Privilege::Controller);
    assert_eq!(router.metrics().snapshot().handshakes_denied, 0);
}

#[test]
fn nickname_cannot_forge_user_list_lines() {
    let (router, transport) = simulated_router();

    send(&router, B, Service::Nickname, encode_text("x\n*mallory"));
    send(&router, B, Service::Nickname, encode_text("x\r!mallory"));
    assert!(transport.take().is_empty());
    assert_eq!(router.metrics().snapshot().silent_drops, 2);

    take_control(&router, A);
    let users = router.authority().user_list().unwrap();
    assert_eq!(users, "*anonymous-1\nanonymous-2");
    assert_eq!(
        users
            .lines()
            .filter(|l| l.starts_with('*') || l.starts_with('!'))
            .count(),
        1
    );
}

#[test]
fn control_is_exclusive_and_follows_the_last_valid_digest() {
    let (router, transport) = simulated_router();
    let target = AzEl::new(180.0, 45.0).to_payload();

    take_control(&router, A);
    let sent = transport.take();
    assert_eq!(acks_to(&sent, A), vec![Service::Success.id()]);
    let users = sent
        .iter()
        .find(|(to, p)| to.is_none() && p.service == Service::UserList.id())
        .expect("user list broadcast");
    assert_eq!(
        decode_text(&users.1.payload).unwrap(),
        "*anonymous-1\nanonymous-2"
    );

    send(&router, B, Service::MoveAzEl, target.clone());
    assert_eq!(acks_to(&transport.take(), B), vec![Service::NoPrivilege.id()]);

    take_control(&router, B);
    transport.take();
    assert_eq!(router.authority().controller().unwrap(), Some(B));

    send(&router, A, Service::MoveAzEl, target.clone());
    assert_eq!(acks_to(&transport.take(), A), vec![Service::NoPrivilege.id()]);

    send(&router, B, Service::MoveAzEl, target);
    assert_eq!(acks_to(&transport.take(), B), vec![Service::Success.id()]);
    assert_eq!(router.drivers().position().unwrap(), AzEl::new(180.0, 45.0));
}

#[test]
fn wrong_digest_revokes_the_submitter() {
    let (router, transport) = simulated_router();
    take_control(&router, A);
    transport.take();

    send(&router, A, Service::Control, encode_text("not-the-digest"));
    assert_eq!(acks_to(&transport.take(), A), vec![Service::Fail.id()]);
    assert_eq!(router.authority().privilege(A).unwrap(), Privilege::None);

    send(&router, A, Service::Park, Vec::new());
    assert_eq!(acks_to(&transport.take(), A), vec![Service::NoPrivilege.id()]);
}

#[test]
fn master_key_grants_escalated_control() {
    let (router, transport) = simulated_router();

    send(&router, B, Service::Control, encode_text("guess"));
    send(&router, B, Service::Control, encode_text(MASTER));
    assert_eq!(
        acks_to(&transport.take(), B),
        vec![Service::Fail.id(), Service::Success.id()]
    );
    assert_eq!(router.authority().privilege(B).unwrap(), Privilege::Master);
    assert_eq!(
        router.authority().user_list().unwrap(),
        "anonymous-1\n!anonymous-2"
    );
}

#[test]
fn capabilities_without_backend_report_zero_limits() {
    let (router, transport) = router_with(DriverTable::new());

    send(&router, A, Service::Capabilities, Vec::new());

    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    let (to, packet) = &sent[0];
    assert_eq!(*to, Some(A));
    assert_eq!(packet.service, Service::Capabilities.id());
    assert_eq!(packet.transaction_id, 7);

    let caps = Capabilities::from_payload(Service::Capabilities, &packet.payload).unwrap();
    assert_eq!(caps.altitude, 20);
    assert_eq!(caps.axis, Default::default());
    assert_eq!(caps.spectrometer, Default::default());
}

#[test]
fn controlled_command_without_backend_fails() {
    let (router, transport) = router_with(DriverTable::new());
    take_control(&router, A);
    transport.take();

    send(&router, A, Service::Park, Vec::new());
    assert_eq!(acks_to(&transport.take(), A), vec![Service::Fail.id()]);
    assert_eq!(router.metrics().snapshot().backend_failures, 1);
}

#[test]
fn unknown_service_is_answered_with_fail() {
    let (router, transport) = simulated_router();

    router.route(A, Packet::new(0x7777, 3, Vec::new()));

    let sent = transport.take();
    assert_eq!(acks_to(&sent, A), vec![Service::Fail.id()]);
    assert_eq!(sent[0].1.transaction_id, 3);
}

#[test]
fn controlled_service_without_handler_is_ignored() {
    let keys = ControlKeys::new(SECRET, STATION, None).unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let router = Router::new(
        station(),
        Arc::new(SessionAuthority::new(keys)),
        Arc::new(DriverTable::new()),
        transport.clone(),
    )
    .with_dispatcher({
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Service::Control, |router: &Router, req: &Request<'_>| {
            let digest = decode_text(req.payload)?;
            router.authority().submit_digest(req.connection, digest)?;
            Ok(Reply::silent())
        });
        dispatcher
    });
    router.open_session(A, "peer").unwrap();
    take_control(&router, A);
    transport.take();

    send(&router, A, Service::Park, Vec::new());
    assert!(transport.take().is_empty());
}

#[test]
fn checksum_mismatch_is_processed_anyway() {
    let (router, transport) = simulated_router();
    let mut packet = Packet::new(Service::UserList.id(), 9, Vec::new());
    packet.integrity ^= 0xFFFF;

    router.route(A, packet);

    let sent = transport.take();
    assert_eq!(acks_to(&sent, A), vec![Service::UserList.id()]);
    assert_eq!(router.metrics().snapshot().checksum_mismatches, 1);
}

#[test]
fn malformed_frame_gets_no_answer() {
    let (router, transport) = simulated_router();
    let mut frame = Packet::encode(Service::Capabilities.id(), 1, &[]);
    frame.push(0xAB);

    router.handle_frame(A, &frame);
    router.handle_frame(A, &frame[..4]);

    assert!(transport.take().is_empty());
    assert_eq!(router.metrics().snapshot().framing_errors, 2);
}

#[test]
fn message_is_broadcast_with_sender_name() {
    let (router, transport) = simulated_router();
    send(&router, A, Service::Nickname, encode_text("vega"));
    transport.take();

    send(&router, A, Service::Message, encode_text("clear skies"));

    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, None);
    assert_eq!(decode_text(&sent[0].1.payload).unwrap(), "vega: clear skies");
}

#[test]
fn message_that_would_overflow_the_text_field_is_dropped() {
    let (router, transport) = simulated_router();
    send(&router, A, Service::Nickname, encode_text("vega"));
    transport.take();

    // "vega: " plus this fills the 16-bit length exactly.
    let fits = "s".repeat(MAX_TEXT_LEN - "vega: ".len());
    send(&router, A, Service::Message, encode_text(&fits));
    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        decode_text(&sent[0].1.payload).unwrap().len(),
        MAX_TEXT_LEN
    );

    let overflows = format!("{fits}s");
    send(&router, A, Service::Message, encode_text(&overflows));
    assert!(transport.take().is_empty());
    assert_eq!(router.metrics().snapshot().silent_drops, 1);
}

#[test]
fn video_uri_without_stream_fails() {
    let (router, transport) = simulated_router();
    send(&router, A, Service::VideoUri, Vec::new());
    assert_eq!(acks_to(&transport.take(), A), vec![Service::Fail.id()]);
}

#[test]
fn inbound_acknowledgements_are_ignored() {
    let (router, transport) = simulated_router();
    for ack in [Service::Success, Service::Fail, Service::InvalidPacket, Service::NoPrivilege] {
        send(&router, A, ack, Vec::new());
    }
    assert!(transport.take().is_empty());
}

#[test]
fn acquisition_publishes_spectra_to_everyone() {
    let (router, transport) = simulated_router();
    take_control(&router, A);

    let config = AcquisitionConfig {
        freq_start: 1_400_000_000,
        freq_stop: 1_440_000_000,
        bandwidth_divider: 1,
        bin_divider: 4,
        stack: 1,
        acquisition_limit: 0,
    };
    send(&router, A, Service::SetAcquisitionConfig, config.to_payload());
    send(&router, A, Service::AcquisitionEnable, Vec::new());

    let sent = transport.take();
    let announced = sent
        .iter()
        .find(|(to, p)| to.is_none() && p.service == Service::GetAcquisitionConfig.id())
        .expect("config announcement");
    assert_eq!(
        AcquisitionConfig::from_payload(Service::GetAcquisitionConfig, &announced.1.payload)
            .unwrap(),
        config
    );
    assert!(router.acquisition_active());

    assert!(router.poll_acquisition().unwrap());
    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, None);
    assert_eq!(sent[0].1.service, Service::SpectrumData.id());
    let spectrum = SpectrumData::from_payload(&sent[0].1.payload).unwrap();
    assert_eq!(spectrum.samples.len(), 256);

    send(&router, A, Service::AcquisitionDisable, Vec::new());
    transport.take();
    assert!(!router.poll_acquisition().unwrap());
}

#[test]
fn acquisition_limit_ends_publishing() {
    let (router, transport) = simulated_router();
    take_control(&router, A);

    let config = AcquisitionConfig {
        freq_start: 1_400_000_000,
        freq_stop: 1_440_000_000,
        bandwidth_divider: 1,
        bin_divider: 4,
        stack: 1,
        acquisition_limit: 2,
    };
    send(&router, A, Service::SetAcquisitionConfig, config.to_payload());
    send(&router, A, Service::AcquisitionEnable, Vec::new());
    transport.take();

    assert!(router.poll_acquisition().unwrap());
    assert!(router.acquisition_active());
    assert!(router.poll_acquisition().unwrap());
    assert!(!router.acquisition_active());
    assert!(!router.poll_acquisition().unwrap());
    assert_eq!(router.metrics().snapshot().spectra_published, 2);

    // Enabling again starts a fresh run.
    send(&router, A, Service::AcquisitionEnable, Vec::new());
    transport.take();
    assert!(router.acquisition_active());
    assert!(router.poll_acquisition().unwrap());
    assert!(router.acquisition_active());
}

#[test]
fn handover_waits_for_running_controlled_command() {
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let seen = Arc::new(Mutex::new(None));
    let seen_by_handler = Arc::clone(&seen);

    let mut dispatcher = Dispatcher::with_default_handlers();
    dispatcher.register(Service::Park, move |router: &Router, _req: &Request<'_>| {
        entered_tx.send(()).unwrap();
        release_rx.lock().unwrap().recv().unwrap();
        *seen_by_handler.lock().unwrap() = router.authority().controller()?;
        Ok(Reply::ack(Service::Success))
    });

    let (router, transport) = simulated_router();
    let router = Arc::new(router.with_dispatcher(dispatcher));
    take_control(&router, A);
    transport.take();

    let parking = {
        let router = Arc::clone(&router);
        thread::spawn(move || send(&router, A, Service::Park, Vec::new()))
    };
    entered_rx.recv().unwrap();

    let handshake = {
        let router = Arc::clone(&router);
        thread::spawn(move || take_control(&router, B))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(router.authority().controller().unwrap(), Some(A));

    release_tx.send(()).unwrap();
    parking.join().unwrap();
    handshake.join().unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(A));
    assert_eq!(router.authority().controller().unwrap(), Some(B));
    assert_eq!(acks_to(&transport.take(), A), vec![Service::Success.id()]);
}

#[test]
fn hotload_round_trip_through_backend() {
    let powered = Arc::new(Mutex::new(false));
    let set = Arc::clone(&powered);
    let get = Arc::clone(&powered);
    let module = StaticModule::new("hotload")
        .with(Binding::HotloadSet(Arc::new(move |on: bool| {
            *set.lock().unwrap() = on;
            0
        })))
        .with(Binding::HotloadStatus(Arc::new(move || *get.lock().unwrap())));
    let mut drivers = DriverTable::new();
    drivers.load_module(&module);

    let (router, transport) = router_with(drivers);
    take_control(&router, A);
    send(&router, A, Service::HotloadEnable, Vec::new());
    transport.take();
    assert!(*powered.lock().unwrap());

    send(&router, B, Service::HotloadStatus, Vec::new());
    let sent = transport.take();
    assert_eq!(sent[0].1.payload, vec![0, 0, 0, 1]);
}

#[test]
fn closing_controller_session_releases_control() {
    let (router, transport) = simulated_router();
    take_control(&router, A);
    transport.take();

    router.close_session(A).unwrap();
    assert_eq!(router.authority().controller().unwrap(), None);

    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(decode_text(&sent[0].1.payload).unwrap(), "anonymous-2");
}

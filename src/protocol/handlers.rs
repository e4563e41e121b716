//! Default handlers for every catalog service.

use tracing::{debug, info};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::authority::HandshakeOutcome;
use crate::protocol::dispatcher::{Dispatcher, Reply, Request, Router};
use crate::protocol::message::{
    decode_text, encode_text, expect_empty, AcquisitionConfig, AzEl, Capabilities,
    CapabilitiesWithHorizon, FixedPayload, HotloadState, MAX_TEXT_LEN,
};
use crate::protocol::service::Service;

pub(crate) fn register_defaults(dispatcher: &mut Dispatcher) {
    dispatcher.register(Service::Capabilities, capabilities);
    dispatcher.register(Service::CapabilitiesHorizon, capabilities_with_horizon);
    dispatcher.register(Service::GetPosition, get_position);
    dispatcher.register(Service::Status, status);
    dispatcher.register(Service::HotloadStatus, hotload_status);
    dispatcher.register(Service::GetAcquisitionConfig, get_acquisition_config);
    dispatcher.register(Service::Control, control);
    dispatcher.register(Service::Message, message);
    dispatcher.register(Service::Nickname, nickname);
    dispatcher.register(Service::UserList, user_list);
    dispatcher.register(Service::VideoUri, video_uri);

    // Clients acknowledging our pushes get no answer, or two peers could
    // bounce failures at each other forever.
    for ack in [
        Service::InvalidPacket,
        Service::Success,
        Service::Fail,
        Service::NoPrivilege,
    ] {
        dispatcher.register(ack, ignore);
    }

    dispatcher.register(Service::MoveAzEl, move_azel);
    dispatcher.register(Service::Park, park);
    dispatcher.register(Service::Recalibrate, recalibrate);
    dispatcher.register(Service::SetAcquisitionConfig, set_acquisition_config);
    dispatcher.register(Service::AcquisitionEnable, acquisition_enable);
    dispatcher.register(Service::AcquisitionDisable, acquisition_disable);
    dispatcher.register(Service::HotloadEnable, hotload_enable);
    dispatcher.register(Service::HotloadDisable, hotload_disable);
}

fn ignore(_: &Router, req: &Request<'_>) -> Result<Reply> {
    debug!(connection = req.connection, service = %req.service, "Ignoring client acknowledgement");
    Ok(Reply::silent())
}

fn describe(router: &Router) -> Capabilities {
    let station = router.station();
    Capabilities {
        latitude: station.latitude,
        longitude: station.longitude,
        altitude: station.altitude,
        axis: router.drivers().axis_limits(),
        spectrometer: router.drivers().spectrometer_limits(),
    }
}

fn capabilities(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    Ok(Reply::to_sender(
        Service::Capabilities,
        describe(router).to_payload(),
    ))
}

fn capabilities_with_horizon(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    let reply = CapabilitiesWithHorizon {
        capabilities: describe(router),
        horizon: router.station().horizon.points().to_vec(),
    };
    Ok(Reply::to_sender(
        Service::CapabilitiesHorizon,
        reply.to_payload(),
    ))
}

fn get_position(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    let position = router.drivers().position()?;
    Ok(Reply::to_sender(Service::GetPosition, position.to_payload()))
}

fn status(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    let status = router.drivers().drive_status();
    Ok(Reply::to_sender(Service::Status, status.to_payload()))
}

fn hotload_status(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    let state = HotloadState {
        powered: router.drivers().hotload_powered(),
    };
    Ok(Reply::to_sender(Service::HotloadStatus, state.to_payload()))
}

fn get_acquisition_config(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    let config = match router.drivers().acquisition_config() {
        Ok(config) => config,
        Err(e) => router.acquisition()?.config.ok_or(e)?,
    };
    Ok(Reply::to_sender(
        Service::GetAcquisitionConfig,
        config.to_payload(),
    ))
}

fn control(router: &Router, req: &Request<'_>) -> Result<Reply> {
    let digest = decode_text(req.payload)?;
    let outcome = {
        let _gate = router.handover_gate()?;
        router.authority().submit_digest(req.connection, digest)?
    };

    let metrics = router.metrics();
    let ack = match outcome {
        HandshakeOutcome::Granted { .. } => {
            metrics.handshake_granted();
            Service::Success
        }
        HandshakeOutcome::Escalated { .. } => {
            metrics.handshake_escalated();
            Service::Success
        }
        HandshakeOutcome::Denied { .. } => {
            metrics.handshake_denied();
            Service::Fail
        }
    };

    let users = router.authority().user_list()?;
    Ok(Reply::ack(ack).then_broadcast(Service::UserList, encode_text(&users)))
}

fn message(router: &Router, req: &Request<'_>) -> Result<Reply> {
    let text = decode_text(req.payload)?;
    let name = router.authority().display_name(req.connection)?;
    let attributed = format!("{name}: {text}");
    if attributed.len() > MAX_TEXT_LEN {
        return Err(ProtocolError::MalformedText(constants::ERR_MESSAGE_TOO_LONG));
    }
    Ok(Reply::broadcast(Service::Message, encode_text(&attributed)))
}

fn nickname(router: &Router, req: &Request<'_>) -> Result<Reply> {
    let nickname = decode_text(req.payload)?;
    router.authority().set_nickname(req.connection, nickname)?;
    info!(connection = req.connection, nickname, "Nickname set");

    let users = router.authority().user_list()?;
    Ok(Reply::ack(Service::Success).then_broadcast(Service::UserList, encode_text(&users)))
}

fn user_list(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    let users = router.authority().user_list()?;
    Ok(Reply::to_sender(Service::UserList, encode_text(&users)))
}

fn video_uri(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    Ok(match &router.station().video_uri {
        Some(uri) => Reply::to_sender(Service::VideoUri, encode_text(uri)),
        None => Reply::ack(Service::Fail),
    })
}

fn move_azel(router: &Router, req: &Request<'_>) -> Result<Reply> {
    let target = AzEl::from_payload(req.service, req.payload)?;
    info!(
        connection = req.connection,
        azimuth = target.azimuth,
        elevation = target.elevation,
        "Moving telescope"
    );
    router.drivers().move_to(target)?;
    Ok(Reply::ack(Service::Success))
}

fn park(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    router.drivers().park()?;
    Ok(Reply::ack(Service::Success))
}

fn recalibrate(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    router.drivers().recalibrate()?;
    Ok(Reply::ack(Service::Success))
}

fn set_acquisition_config(router: &Router, req: &Request<'_>) -> Result<Reply> {
    let config = AcquisitionConfig::validated(req.service, req.payload)?;
    router.drivers().configure_spectrometer(&config)?;
    router.acquisition()?.config = Some(config);

    info!(
        connection = req.connection,
        freq_start = config.freq_start,
        freq_stop = config.freq_stop,
        "Acquisition configured"
    );
    Ok(Reply::ack(Service::Success)
        .then_broadcast(Service::GetAcquisitionConfig, config.to_payload()))
}

fn acquisition_enable(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    router.drivers().start_acquisition()?;
    router.acquisition()?.start();
    Ok(Reply::ack(Service::Success))
}

fn acquisition_disable(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    router.drivers().stop_acquisition()?;
    router.acquisition()?.active = false;
    Ok(Reply::ack(Service::Success))
}

fn hotload_enable(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    router.drivers().set_hotload(true)?;
    Ok(Reply::ack(Service::Success))
}

fn hotload_disable(router: &Router, req: &Request<'_>) -> Result<Reply> {
    expect_empty(req.service, req.payload)?;
    router.drivers().set_hotload(false)?;
    Ok(Reply::ack(Service::Success))
}

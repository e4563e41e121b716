#![no_main]

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use telescope_control::config::TelescopeConfig;
use telescope_control::driver::simulator::SimulatedTelescope;
use telescope_control::driver::DriverTable;
use telescope_control::protocol::authority::ConnectionId;
use telescope_control::transport::Transport;
use telescope_control::Router;

struct Discard;

impl Transport for Discard {
    fn send(&self, _: Bytes) -> telescope_control::Result<()> {
        Ok(())
    }

    fn send_to(&self, _: ConnectionId, _: Bytes) -> telescope_control::Result<()> {
        Ok(())
    }
}

fn router() -> &'static Router {
    static ROUTER: OnceLock<Router> = OnceLock::new();
    ROUTER.get_or_init(|| {
        let sim = Arc::new(SimulatedTelescope::default());
        let mut drivers = DriverTable::new();
        drivers.load_module(&sim.module());
        let router = Router::from_config(&TelescopeConfig::default(), Arc::new(drivers), Arc::new(Discard))
            .expect("default config builds a router");
        router.open_session(1, "fuzzer").expect("session opens");
        router
    })
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary frames from an unprivileged session: never panic
    router().handle_frame(1, data);
});

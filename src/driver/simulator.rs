//! Software telescope for running the server without hardware.
//!
//! The drive slews instantly within its limits and the spectrometer produces
//! a noise floor with a hydrogen line on top whenever it is running.

use std::sync::{Arc, Mutex};

use rand::Rng;
use tracing::debug;

use crate::driver::{Binding, StaticModule, STATUS_OK};
use crate::protocol::message::{
    AcquisitionConfig, AxisLimits, AzEl, SpectrometerLimits, SpectrumData, Status,
};

/// Rest frequency of the neutral hydrogen line, Hz.
pub const HYDROGEN_LINE_HZ: u64 = 1_420_405_751;

const ERR_OUT_OF_LIMITS: i32 = -2;
const ERR_NOT_CONFIGURED: i32 = -4;
const ERR_LOCK: i32 = -5;

const BASE_POINTS: u32 = 1024;
const NOISE_FLOOR: i32 = 1000;

#[derive(Debug)]
struct SimState {
    position: AzEl,
    hotload: bool,
    config: Option<AcquisitionConfig>,
    running: bool,
    blocks: u32,
}

#[derive(Debug)]
pub struct SimulatedTelescope {
    axis: AxisLimits,
    spectrometer: SpectrometerLimits,
    park_position: AzEl,
    state: Mutex<SimState>,
}

impl Default for SimulatedTelescope {
    fn default() -> Self {
        Self::new(
            AxisLimits {
                az_lower: 0.0,
                az_upper: 360.0,
                el_lower: 0.0,
                el_upper: 90.0,
                az_resolution: 0.1,
                el_resolution: 0.1,
            },
            SpectrometerLimits {
                freq_lower: 1_370_000_000,
                freq_upper: 1_470_000_000,
                bandwidth_divider_min: 1,
                bandwidth_divider_max: 16,
                bin_divider_min: 1,
                bin_divider_max: 64,
            },
        )
    }
}

impl SimulatedTelescope {
    pub fn new(axis: AxisLimits, spectrometer: SpectrometerLimits) -> Self {
        let park_position = AzEl::new(axis.az_lower, axis.el_upper);
        Self {
            axis,
            spectrometer,
            park_position,
            state: Mutex::new(SimState {
                position: park_position,
                hotload: false,
                config: None,
                running: false,
                blocks: 0,
            }),
        }
    }

    fn with_state<T>(&self, fallback: T, f: impl FnOnce(&mut SimState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(_) => fallback,
        }
    }

    fn slew(&self, target: AzEl) -> i32 {
        if !self.axis.contains(target) {
            return ERR_OUT_OF_LIMITS;
        }
        self.with_state(ERR_LOCK, |s| {
            s.position = target;
            STATUS_OK
        })
    }

    fn configure(&self, config: &AcquisitionConfig) -> i32 {
        let limits = &self.spectrometer;
        let in_band = config.freq_start >= limits.freq_lower && config.freq_stop <= limits.freq_upper;
        let bw_ok = (limits.bandwidth_divider_min as u32..=limits.bandwidth_divider_max as u32)
            .contains(&config.bandwidth_divider);
        let bin_ok = (limits.bin_divider_min as u32..=limits.bin_divider_max as u32)
            .contains(&config.bin_divider);
        if !(in_band && bw_ok && bin_ok) {
            return ERR_OUT_OF_LIMITS;
        }

        self.with_state(ERR_LOCK, |s| {
            s.config = Some(*config);
            s.blocks = 0;
            STATUS_OK
        })
    }

    fn set_running(&self, running: bool) -> i32 {
        self.with_state(ERR_LOCK, |s| {
            if running && s.config.is_none() {
                return ERR_NOT_CONFIGURED;
            }
            s.running = running;
            s.blocks = 0;
            STATUS_OK
        })
    }

    fn read(&self) -> Option<SpectrumData> {
        let config = self.with_state(None, |s| {
            if !s.running {
                return None;
            }
            let config = s.config?;
            s.blocks += 1;
            if config.acquisition_limit != 0 && s.blocks >= config.acquisition_limit {
                debug!(blocks = s.blocks, "Acquisition limit reached");
                s.running = false;
            }
            Some(config)
        })?;

        Some(synthesize(&config))
    }

    /// Export every capability as an in-process backend module.
    pub fn module(self: &Arc<Self>) -> StaticModule {
        let sim = Arc::clone(self);
        let slew = Arc::clone(self);
        let park = Arc::clone(self);
        let position = Arc::clone(self);
        let hotload_set = Arc::clone(self);
        let hotload_get = Arc::clone(self);
        let configure = Arc::clone(self);
        let get_config = Arc::clone(self);
        let start = Arc::clone(self);
        let stop = Arc::clone(self);
        let read = Arc::clone(self);

        StaticModule::new("simulator")
            .with(Binding::DriveMove(Arc::new(move |t: AzEl| slew.slew(t))))
            .with(Binding::DrivePark(Arc::new(move || park.slew(park.park_position))))
            .with(Binding::DriveRecalibrate(Arc::new(|| STATUS_OK)))
            .with(Binding::DrivePosition(Arc::new(move || {
                position.with_state(None, |s| Some(s.position))
            })))
            .with(Binding::DriveStatus(Arc::new(Status::default)))
            .with(Binding::DriveLimits(Arc::new(move || sim.axis)))
            .with(Binding::HotloadSet(Arc::new(move |on: bool| {
                hotload_set.with_state(ERR_LOCK, |s| {
                    s.hotload = on;
                    STATUS_OK
                })
            })))
            .with(Binding::HotloadStatus(Arc::new(move || {
                hotload_get.with_state(false, |s| s.hotload)
            })))
            .with(Binding::SpectrometerConfigure(Arc::new(
                move |c: &AcquisitionConfig| configure.configure(c),
            )))
            .with(Binding::SpectrometerGetConfig(Arc::new(move || {
                get_config.with_state(None, |s| s.config)
            })))
            .with(Binding::SpectrometerStart(Arc::new(move || start.set_running(true))))
            .with(Binding::SpectrometerStop(Arc::new(move || stop.set_running(false))))
            .with(Binding::SpectrometerRead(Arc::new(move || read.read())))
            .with(Binding::SpectrometerLimits(Arc::new({
                let limits = self.spectrometer;
                move || limits
            })))
    }
}

fn synthesize(config: &AcquisitionConfig) -> SpectrumData {
    let points = (BASE_POINTS / config.bin_divider.max(1)).max(16);
    let span = config.freq_stop.saturating_sub(config.freq_start);
    let increment = (span / points as u64).max(1);
    let stack = config.stack.max(1) as i32;

    let mut rng = rand::rng();
    let samples = (0..points as u64)
        .map(|i| {
            let freq = config.freq_start + i * increment;
            let noise = rng.random_range(-40..=40) / stack;
            let line = if freq.abs_diff(HYDROGEN_LINE_HZ) < increment * 2 {
                250
            } else {
                0
            };
            NOISE_FLOOR + noise + line
        })
        .collect();

    SpectrumData {
        freq_lower: config.freq_start,
        freq_upper: config.freq_start + increment * points as u64,
        freq_increment: increment,
        samples,
    }
}

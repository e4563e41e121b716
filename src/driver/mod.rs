//! # Driver Indirection Layer
//!
//! Hardware actuation is delegated to backend modules. Each module binds some
//! subset of a closed set of capabilities; the [`DriverTable`] holds one slot
//! per capability and is filled once at startup, strictly before any command
//! is routed. After that it is shared read-only, so invocation takes no locks.
//!
//! A slot with nothing bound is a normal state. Every invocation method
//! documents what it does when its slot is [`Slot::Unbound`]: informational
//! queries fall back to a default, control actions report
//! [`DriverError::Unavailable`].
//!
//! ## Loading
//! ```rust
//! use std::sync::Arc;
//! use telescope_control::driver::{Binding, DriverTable, StaticModule};
//!
//! let hotload = StaticModule::new("hotload")
//!     .with(Binding::HotloadSet(Arc::new(|_on: bool| 0)));
//!
//! let mut table = DriverTable::new();
//! table.load_module(&hotload);
//! assert!(table.set_hotload(true).is_ok());
//! assert!(table.park().is_err());
//! ```

pub mod horizon;
pub mod simulator;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{DriverError, ProtocolError, Result};
use crate::protocol::message::{
    AcquisitionConfig, AxisLimits, AzEl, SpectrometerLimits, SpectrumData, Status,
};

pub use horizon::HorizonProfile;

/// Backend status code for success. Anything else is a failure code.
pub const STATUS_OK: i32 = 0;

pub type MoveFn = dyn Fn(AzEl) -> i32 + Send + Sync;
pub type ActionFn = dyn Fn() -> i32 + Send + Sync;
pub type PositionFn = dyn Fn() -> Option<AzEl> + Send + Sync;
pub type DriveStatusFn = dyn Fn() -> Status + Send + Sync;
pub type AxisLimitsFn = dyn Fn() -> AxisLimits + Send + Sync;
pub type HotloadSetFn = dyn Fn(bool) -> i32 + Send + Sync;
pub type HotloadStatusFn = dyn Fn() -> bool + Send + Sync;
pub type ConfigureFn = dyn Fn(&AcquisitionConfig) -> i32 + Send + Sync;
pub type GetConfigFn = dyn Fn() -> Option<AcquisitionConfig> + Send + Sync;
pub type ReadFn = dyn Fn() -> Option<SpectrumData> + Send + Sync;
pub type SpectrometerLimitsFn = dyn Fn() -> SpectrometerLimits + Send + Sync;

/// A capability slot: either a bound callable or nothing.
pub enum Slot<F: ?Sized> {
    Bound(Arc<F>),
    Unbound,
}

impl<F: ?Sized> Slot<F> {
    pub fn is_bound(&self) -> bool {
        matches!(self, Slot::Bound(_))
    }

    fn get(&self) -> Option<&F> {
        match self {
            Slot::Bound(f) => Some(f.as_ref()),
            Slot::Unbound => None,
        }
    }

    /// Bind `f`, returning whether an earlier binding was replaced.
    fn bind(&mut self, f: Arc<F>) -> bool {
        std::mem::replace(self, Slot::Bound(f)).is_bound()
    }
}

impl<F: ?Sized> Default for Slot<F> {
    fn default() -> Self {
        Slot::Unbound
    }
}

macro_rules! capabilities {
    ($($(#[$doc:meta])* $variant:ident => $field:ident, $symbol:literal, $ty:ty;)+) => {
        /// The closed set of hardware-facing operations a backend may provide.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Capability {
            $($(#[$doc])* $variant,)+
        }

        impl Capability {
            pub const ALL: &'static [Capability] = &[$(Capability::$variant,)+];

            /// Symbol name a backend module exports for this capability.
            pub fn symbol(self) -> &'static str {
                match self {
                    $(Capability::$variant => $symbol,)+
                }
            }

            pub fn from_symbol(symbol: &str) -> Option<Self> {
                match symbol {
                    $($symbol => Some(Capability::$variant),)+
                    _ => None,
                }
            }
        }

        /// A typed callable tagged with the capability it implements.
        #[derive(Clone)]
        pub enum Binding {
            $($variant(Arc<$ty>),)+
        }

        impl Binding {
            pub fn capability(&self) -> Capability {
                match self {
                    $(Binding::$variant(_) => Capability::$variant,)+
                }
            }
        }

        /// One slot per capability.
        #[derive(Default)]
        pub struct DriverTable {
            $($field: Slot<$ty>,)+
        }

        impl DriverTable {
            /// Bind a capability. The last registration wins.
            pub fn register(&mut self, binding: Binding) {
                let capability = binding.capability();
                let replaced = match binding {
                    $(Binding::$variant(f) => self.$field.bind(f),)+
                };
                if replaced {
                    debug!(capability = %capability, "Capability rebound");
                }
            }

            pub fn is_bound(&self, capability: Capability) -> bool {
                match capability {
                    $(Capability::$variant => self.$field.is_bound(),)+
                }
            }
        }
    };
}

capabilities! {
    DriveMove => drive_move, "drive_move_azel", MoveFn;
    DrivePark => drive_park, "drive_park", ActionFn;
    DriveRecalibrate => drive_recalibrate, "drive_recalibrate", ActionFn;
    DrivePosition => drive_position, "drive_get_position", PositionFn;
    DriveStatus => drive_status, "drive_status", DriveStatusFn;
    DriveLimits => drive_limits, "drive_limits", AxisLimitsFn;
    /// Switch the calibration load on or off.
    HotloadSet => hotload_set, "hotload_set", HotloadSetFn;
    HotloadStatus => hotload_status, "hotload_status", HotloadStatusFn;
    SpectrometerConfigure => spectrometer_configure, "spectrometer_configure", ConfigureFn;
    SpectrometerGetConfig => spectrometer_get_config, "spectrometer_get_config", GetConfigFn;
    SpectrometerStart => spectrometer_start, "spectrometer_start", ActionFn;
    SpectrometerStop => spectrometer_stop, "spectrometer_stop", ActionFn;
    /// Fetch the next finished spectrum, if one is ready.
    SpectrometerRead => spectrometer_read, "spectrometer_read", ReadFn;
    SpectrometerLimits => spectrometer_limits, "spectrometer_limits", SpectrometerLimitsFn;
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({})", self.capability())
    }
}

impl fmt::Debug for DriverTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.bound()).finish()
    }
}

/// A loaded backend module that can be queried for capability symbols.
///
/// How the module was opened is the caller's business; the table only asks
/// it for each known symbol name once.
pub trait BackendModule: Send + Sync {
    fn name(&self) -> &str;

    fn resolve_symbol(&self, symbol: &str) -> Option<Binding>;
}

/// An in-process module assembled from closures.
#[derive(Debug, Default, Clone)]
pub struct StaticModule {
    name: String,
    symbols: HashMap<String, Binding>,
}

impl StaticModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Export `binding` under its capability's symbol name.
    pub fn with(mut self, binding: Binding) -> Self {
        self.symbols
            .insert(binding.capability().symbol().to_string(), binding);
        self
    }

    /// Export `binding` under an arbitrary symbol name.
    pub fn with_symbol(mut self, symbol: impl Into<String>, binding: Binding) -> Self {
        self.symbols.insert(symbol.into(), binding);
        self
    }
}

impl BackendModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_symbol(&self, symbol: &str) -> Option<Binding> {
        self.symbols.get(symbol).cloned()
    }
}

fn check(capability: Capability, code: i32) -> std::result::Result<(), DriverError> {
    if code == STATUS_OK {
        Ok(())
    } else {
        Err(DriverError::Failed { capability, code })
    }
}

fn unavailable(capability: Capability) -> DriverError {
    debug!(capability = %capability, "Capability not bound");
    DriverError::Unavailable(capability)
}

impl DriverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities that currently have a binding.
    pub fn bound(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|&c| self.is_bound(c))
            .collect()
    }

    /// Bind a capability by symbol name, checking that the callable's type
    /// belongs to that name.
    pub fn register_capability(&mut self, name: &str, binding: Binding) -> Result<()> {
        let capability = Capability::from_symbol(name)
            .ok_or_else(|| ProtocolError::UnknownCapability(name.to_string()))?;

        if binding.capability() != capability {
            return Err(ProtocolError::CapabilityMismatch {
                name: name.to_string(),
                bound: binding.capability(),
            });
        }

        self.register(binding);
        Ok(())
    }

    /// Probe `module` once for every known capability symbol and bind what it
    /// exports. Modules are additive: slots the module does not export keep
    /// whatever an earlier module bound.
    ///
    /// Returns the number of capabilities bound from this module.
    #[instrument(skip(self, module), fields(module = module.name()))]
    pub fn load_module(&mut self, module: &dyn BackendModule) -> usize {
        let mut bound = 0;
        for &capability in Capability::ALL {
            let Some(binding) = module.resolve_symbol(capability.symbol()) else {
                continue;
            };

            if binding.capability() != capability {
                warn!(
                    symbol = capability.symbol(),
                    exported = %binding.capability(),
                    "Symbol exports the wrong capability type, skipping"
                );
                continue;
            }

            self.register(binding);
            bound += 1;
        }

        info!(bound, "Backend module loaded");
        bound
    }

    /// Slew to `target`. Unbound: unavailable.
    pub fn move_to(&self, target: AzEl) -> std::result::Result<(), DriverError> {
        let c = Capability::DriveMove;
        let f = self.drive_move.get().ok_or_else(|| unavailable(c))?;
        check(c, f(target))
    }

    /// Unbound: unavailable.
    pub fn park(&self) -> std::result::Result<(), DriverError> {
        self.action(Capability::DrivePark, &self.drive_park)
    }

    /// Unbound: unavailable.
    pub fn recalibrate(&self) -> std::result::Result<(), DriverError> {
        self.action(Capability::DriveRecalibrate, &self.drive_recalibrate)
    }

    /// Current pointing. Unbound: unavailable. A bound backend that cannot
    /// read its encoders reports code -1.
    pub fn position(&self) -> std::result::Result<AzEl, DriverError> {
        let c = Capability::DrivePosition;
        let f = self.drive_position.get().ok_or_else(|| unavailable(c))?;
        f().ok_or(DriverError::Failed {
            capability: c,
            code: -1,
        })
    }

    /// Unbound: idle with zero ETA.
    pub fn drive_status(&self) -> Status {
        self.drive_status.get().map(|f| f()).unwrap_or_default()
    }

    /// Unbound: all zero.
    pub fn axis_limits(&self) -> AxisLimits {
        self.drive_limits.get().map(|f| f()).unwrap_or_default()
    }

    /// Unbound: unavailable.
    pub fn set_hotload(&self, on: bool) -> std::result::Result<(), DriverError> {
        let c = Capability::HotloadSet;
        let f = self.hotload_set.get().ok_or_else(|| unavailable(c))?;
        check(c, f(on))
    }

    /// Unbound: powered. Stations without a switchable load keep it on.
    pub fn hotload_powered(&self) -> bool {
        self.hotload_status.get().map(|f| f()).unwrap_or(true)
    }

    /// Unbound: unavailable.
    pub fn configure_spectrometer(
        &self,
        config: &AcquisitionConfig,
    ) -> std::result::Result<(), DriverError> {
        let c = Capability::SpectrometerConfigure;
        let f = self.spectrometer_configure.get().ok_or_else(|| unavailable(c))?;
        check(c, f(config))
    }

    /// Unbound: unavailable. A backend with no configuration yet reports -1.
    pub fn acquisition_config(&self) -> std::result::Result<AcquisitionConfig, DriverError> {
        let c = Capability::SpectrometerGetConfig;
        let f = self.spectrometer_get_config.get().ok_or_else(|| unavailable(c))?;
        f().ok_or(DriverError::Failed {
            capability: c,
            code: -1,
        })
    }

    /// Unbound: unavailable.
    pub fn start_acquisition(&self) -> std::result::Result<(), DriverError> {
        self.action(Capability::SpectrometerStart, &self.spectrometer_start)
    }

    /// Unbound: unavailable.
    pub fn stop_acquisition(&self) -> std::result::Result<(), DriverError> {
        self.action(Capability::SpectrometerStop, &self.spectrometer_stop)
    }

    /// Next finished spectrum, `None` while integrating. Unbound: unavailable.
    pub fn read_spectrum(&self) -> std::result::Result<Option<SpectrumData>, DriverError> {
        let c = Capability::SpectrometerRead;
        let f = self.spectrometer_read.get().ok_or_else(|| unavailable(c))?;
        Ok(f())
    }

    /// Unbound: all zero.
    pub fn spectrometer_limits(&self) -> SpectrometerLimits {
        self.spectrometer_limits.get().map(|f| f()).unwrap_or_default()
    }

    fn action(
        &self,
        capability: Capability,
        slot: &Slot<ActionFn>,
    ) -> std::result::Result<(), DriverError> {
        let f = slot.get().ok_or_else(|| unavailable(capability))?;
        check(capability, f())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn drive_module() -> StaticModule {
        StaticModule::new("drive")
            .with(Binding::DriveMove(Arc::new(|target: AzEl| {
                if target.elevation < 0.0 {
                    -3
                } else {
                    0
                }
            })))
            .with(Binding::DrivePark(Arc::new(|| 0)))
    }

    #[test]
    fn empty_table_defaults() {
        let table = DriverTable::new();
        assert!(table.bound().is_empty());
        assert!(table.hotload_powered());
        assert_eq!(table.drive_status(), Status::default());
        assert_eq!(table.axis_limits(), AxisLimits::default());
        assert_eq!(table.spectrometer_limits(), SpectrometerLimits::default());
        assert_eq!(
            table.park(),
            Err(DriverError::Unavailable(Capability::DrivePark))
        );
        assert_eq!(
            table.read_spectrum(),
            Err(DriverError::Unavailable(Capability::SpectrometerRead))
        );
    }

    #[test]
    fn backend_failure_is_a_result() {
        let mut table = DriverTable::new();
        assert_eq!(table.load_module(&drive_module()), 2);

        assert!(table.move_to(AzEl::new(10.0, 20.0)).is_ok());
        assert_eq!(
            table.move_to(AzEl::new(10.0, -1.0)),
            Err(DriverError::Failed {
                capability: Capability::DriveMove,
                code: -3
            })
        );
    }

    #[test]
    fn modules_are_additive() {
        let spectrometer = StaticModule::new("spectrometer")
            .with(Binding::SpectrometerStart(Arc::new(|| 0)))
            .with(Binding::SpectrometerStop(Arc::new(|| 0)));

        let mut table = DriverTable::new();
        table.load_module(&drive_module());
        table.load_module(&spectrometer);

        assert!(table.park().is_ok());
        assert!(table.start_acquisition().is_ok());
        assert_eq!(table.bound().len(), 4);
    }

    #[test]
    fn last_registration_wins() {
        let mut table = DriverTable::new();
        table.register(Binding::HotloadStatus(Arc::new(|| true)));
        table.register(Binding::HotloadStatus(Arc::new(|| false)));
        assert!(!table.hotload_powered());
    }

    #[test]
    fn register_by_name_checks_type() {
        let mut table = DriverTable::new();
        let park = Binding::DrivePark(Arc::new(|| 0));

        assert!(matches!(
            table.register_capability("drive_recalibrate", park.clone()),
            Err(ProtocolError::CapabilityMismatch { .. })
        ));
        assert!(matches!(
            table.register_capability("warp_drive", park.clone()),
            Err(ProtocolError::UnknownCapability(_))
        ));
        table.register_capability("drive_park", park).unwrap();
        assert!(table.is_bound(Capability::DrivePark));
    }

    #[test]
    fn mistyped_symbol_is_skipped_on_load() {
        let module = StaticModule::new("broken")
            .with_symbol("drive_park", Binding::SpectrometerStart(Arc::new(|| 0)));
        let mut table = DriverTable::new();
        assert_eq!(table.load_module(&module), 0);
        assert!(!table.is_bound(Capability::DrivePark));
    }

    #[test]
    fn symbols_round_trip() {
        for &capability in Capability::ALL {
            assert_eq!(Capability::from_symbol(capability.symbol()), Some(capability));
        }
    }
}

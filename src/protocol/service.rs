//! Service catalog: the closed set of 16-bit service identifiers and the
//! privilege class each one belongs to.

use std::fmt;

/// Whether a service may be used by any connection or only by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivilegeClass {
    Open,
    Controlled,
}

macro_rules! services {
    ($($(#[$doc:meta])* $name:ident = $id:literal, $class:ident;)+) => {
        /// Application-defined service identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Service {
            $($(#[$doc])* $name = $id,)+
        }

        impl Service {
            /// Every catalog entry, in identifier order.
            pub const ALL: &'static [Service] = &[$(Service::$name,)+];

            /// Look up a raw identifier.
            pub fn from_u16(id: u16) -> Option<Self> {
                match id {
                    $($id => Some(Service::$name),)+
                    _ => None,
                }
            }

            pub fn privilege_class(self) -> PrivilegeClass {
                match self {
                    $(Service::$name => PrivilegeClass::$class,)+
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Service::$name => stringify!($name),)+
                }
            }
        }
    };
}

services! {
    /// Acknowledgement for a structurally wrong payload.
    InvalidPacket = 0x0000, Open;
    Capabilities = 0x0001, Open;
    CapabilitiesHorizon = 0x0002, Open;
    MoveAzEl = 0x0003, Controlled;
    Success = 0x0004, Open;
    Fail = 0x0005, Open;
    Recalibrate = 0x0006, Controlled;
    Park = 0x0007, Controlled;
    GetAcquisitionConfig = 0x0008, Open;
    SetAcquisitionConfig = 0x0009, Controlled;
    /// Pushed to every connection when the spectrometer produces data.
    SpectrumData = 0x000A, Open;
    GetPosition = 0x000B, Open;
    AcquisitionEnable = 0x000C, Controlled;
    AcquisitionDisable = 0x000D, Controlled;
    HotloadEnable = 0x000E, Controlled;
    HotloadDisable = 0x000F, Controlled;
    /// Sent only to a connection that tried a controlled service without control.
    NoPrivilege = 0x0010, Open;
    /// Control handshake carrying a digest.
    Control = 0x0011, Open;
    Message = 0x0012, Open;
    Nickname = 0x0013, Open;
    UserList = 0x0014, Open;
    VideoUri = 0x0015, Open;
    Status = 0x0016, Open;
    HotloadStatus = 0x0017, Open;
}

impl Service {
    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    #[inline]
    pub fn is_controlled(self) -> bool {
        self.privilege_class() == PrivilegeClass::Controlled
    }

    /// Acknowledgement services never expect a reply.
    pub fn is_acknowledgement(self) -> bool {
        matches!(
            self,
            Service::InvalidPacket | Service::Success | Service::Fail | Service::NoPrivilege
        )
    }
}

impl From<Service> for u16 {
    fn from(service: Service) -> u16 {
        service.id()
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#06x})", self.name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_round_trip() {
        for &service in Service::ALL {
            assert_eq!(Service::from_u16(service.id()), Some(service));
        }
        assert_eq!(Service::from_u16(0xBEEF), None);
    }

    #[test]
    fn controlled_set() {
        let controlled: Vec<_> = Service::ALL
            .iter()
            .copied()
            .filter(|s| s.is_controlled())
            .collect();
        assert_eq!(
            controlled,
            vec![
                Service::MoveAzEl,
                Service::Recalibrate,
                Service::Park,
                Service::SetAcquisitionConfig,
                Service::AcquisitionEnable,
                Service::AcquisitionDisable,
                Service::HotloadEnable,
                Service::HotloadDisable,
            ]
        );
    }
}

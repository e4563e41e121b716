//! # Message Catalog
//!
//! Typed payload layouts for every service and the validation rules that guard
//! them. All scalar fields travel big-endian. Angles travel as whole
//! arcseconds.
//!
//! Two failure modes exist and they are deliberately different:
//! - a fixed-size payload of the wrong size is [`ProtocolError::InvalidPayload`],
//!   which the router answers with an invalid-packet acknowledgement;
//! - a text payload whose declared length disagrees with its content is
//!   [`ProtocolError::MalformedText`], which the router drops without a word.

use bytes::{Buf, BufMut};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::service::Service;

pub const ARCSEC_PER_DEGREE: f64 = 3600.0;

/// Degrees to whole arcseconds, rounding half away from zero.
///
/// Values beyond the `i32` range saturate.
#[inline]
pub fn deg_to_arcsec(degrees: f64) -> i32 {
    (degrees * ARCSEC_PER_DEGREE).round() as i32
}

#[inline]
pub fn arcsec_to_deg(arcsec: i32) -> f64 {
    arcsec as f64 / ARCSEC_PER_DEGREE
}

fn invalid(service: Service, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidPayload {
        service: service.id(),
        reason: reason.into(),
    }
}

fn expect_size(service: Service, payload: &[u8], size: usize) -> Result<()> {
    if payload.len() != size {
        return Err(invalid(
            service,
            format!("expected {size} bytes, got {}", payload.len()),
        ));
    }
    Ok(())
}

/// Requests that carry no arguments must have an empty payload.
pub fn expect_empty(service: Service, payload: &[u8]) -> Result<()> {
    expect_size(service, payload, 0)
}

/// A fixed-size payload: the whole payload must be exactly `SIZE` bytes.
pub trait FixedPayload: Sized {
    const SIZE: usize;

    fn put(&self, out: &mut Vec<u8>);

    /// Read the fields; `buf` is guaranteed to hold at least `SIZE` bytes.
    fn get(buf: &mut &[u8]) -> Self;

    fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.put(&mut out);
        out
    }

    fn from_payload(service: Service, payload: &[u8]) -> Result<Self> {
        expect_size(service, payload, Self::SIZE)?;
        let mut buf = payload;
        Ok(Self::get(&mut buf))
    }
}

/// Azimuth/elevation pair in degrees. Move targets, position results and
/// horizon profile points all share this encoding.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AzEl {
    pub azimuth: f64,
    pub elevation: f64,
}

impl AzEl {
    pub fn new(azimuth: f64, elevation: f64) -> Self {
        Self { azimuth, elevation }
    }

    pub fn to_arcsec(self) -> (i32, i32) {
        (deg_to_arcsec(self.azimuth), deg_to_arcsec(self.elevation))
    }

    pub fn from_arcsec(azimuth: i32, elevation: i32) -> Self {
        Self::new(arcsec_to_deg(azimuth), arcsec_to_deg(elevation))
    }
}

impl FixedPayload for AzEl {
    const SIZE: usize = 8;

    fn put(&self, out: &mut Vec<u8>) {
        let (az, el) = self.to_arcsec();
        out.put_i32(az);
        out.put_i32(el);
    }

    fn get(buf: &mut &[u8]) -> Self {
        let az = buf.get_i32();
        let el = buf.get_i32();
        Self::from_arcsec(az, el)
    }
}

/// Mechanical range and resolution of the drive, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisLimits {
    pub az_lower: f64,
    pub az_upper: f64,
    pub el_lower: f64,
    pub el_upper: f64,
    pub az_resolution: f64,
    pub el_resolution: f64,
}

impl AxisLimits {
    pub fn contains(&self, target: AzEl) -> bool {
        (self.az_lower..=self.az_upper).contains(&target.azimuth)
            && (self.el_lower..=self.el_upper).contains(&target.elevation)
    }
}

/// Frequency coverage and divider ranges the spectrometer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpectrometerLimits {
    pub freq_lower: u64,
    pub freq_upper: u64,
    pub bandwidth_divider_min: u16,
    pub bandwidth_divider_max: u16,
    pub bin_divider_min: u16,
    pub bin_divider_max: u16,
}

/// Station capabilities descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Capabilities {
    /// Geographic latitude in degrees
    pub latitude: f64,
    /// Geographic longitude in degrees
    pub longitude: f64,
    /// Altitude above sea level in metres
    pub altitude: i32,
    pub axis: AxisLimits,
    pub spectrometer: SpectrometerLimits,
}

impl FixedPayload for Capabilities {
    const SIZE: usize = 9 * 4 + 2 * 8 + 4 * 2;

    fn put(&self, out: &mut Vec<u8>) {
        out.put_i32(deg_to_arcsec(self.latitude));
        out.put_i32(deg_to_arcsec(self.longitude));
        out.put_i32(self.altitude);
        out.put_i32(deg_to_arcsec(self.axis.az_lower));
        out.put_i32(deg_to_arcsec(self.axis.az_upper));
        out.put_i32(deg_to_arcsec(self.axis.el_lower));
        out.put_i32(deg_to_arcsec(self.axis.el_upper));
        out.put_i32(deg_to_arcsec(self.axis.az_resolution));
        out.put_i32(deg_to_arcsec(self.axis.el_resolution));
        out.put_u64(self.spectrometer.freq_lower);
        out.put_u64(self.spectrometer.freq_upper);
        out.put_u16(self.spectrometer.bandwidth_divider_min);
        out.put_u16(self.spectrometer.bandwidth_divider_max);
        out.put_u16(self.spectrometer.bin_divider_min);
        out.put_u16(self.spectrometer.bin_divider_max);
    }

    fn get(buf: &mut &[u8]) -> Self {
        let latitude = arcsec_to_deg(buf.get_i32());
        let longitude = arcsec_to_deg(buf.get_i32());
        let altitude = buf.get_i32();
        let axis = AxisLimits {
            az_lower: arcsec_to_deg(buf.get_i32()),
            az_upper: arcsec_to_deg(buf.get_i32()),
            el_lower: arcsec_to_deg(buf.get_i32()),
            el_upper: arcsec_to_deg(buf.get_i32()),
            az_resolution: arcsec_to_deg(buf.get_i32()),
            el_resolution: arcsec_to_deg(buf.get_i32()),
        };
        let spectrometer = SpectrometerLimits {
            freq_lower: buf.get_u64(),
            freq_upper: buf.get_u64(),
            bandwidth_divider_min: buf.get_u16(),
            bandwidth_divider_max: buf.get_u16(),
            bin_divider_min: buf.get_u16(),
            bin_divider_max: buf.get_u16(),
        };
        Self {
            latitude,
            longitude,
            altitude,
            axis,
            spectrometer,
        }
    }
}

/// Capabilities followed by the station's horizon profile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapabilitiesWithHorizon {
    pub capabilities: Capabilities,
    pub horizon: Vec<AzEl>,
}

impl CapabilitiesWithHorizon {
    pub fn to_payload(&self) -> Vec<u8> {
        let count = self.horizon.len().min(u16::MAX as usize);
        let mut out = Vec::with_capacity(Capabilities::SIZE + 2 + count * AzEl::SIZE);
        self.capabilities.put(&mut out);
        out.put_u16(count as u16);
        for point in &self.horizon[..count] {
            point.put(&mut out);
        }
        out
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let service = Service::CapabilitiesHorizon;
        if payload.len() < Capabilities::SIZE + 2 {
            return Err(invalid(service, "truncated capabilities block"));
        }

        let mut buf = payload;
        let capabilities = Capabilities::get(&mut buf);
        let count = buf.get_u16() as usize;
        expect_size(service, buf, count * AzEl::SIZE)?;

        let horizon = (0..count).map(|_| AzEl::get(&mut buf)).collect();
        Ok(Self {
            capabilities,
            horizon,
        })
    }
}

/// Spectrometer acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquisitionConfig {
    /// Start frequency in Hz
    pub freq_start: u64,
    /// Stop frequency in Hz
    pub freq_stop: u64,
    pub bandwidth_divider: u32,
    pub bin_divider: u32,
    /// Number of spectra averaged into one data block
    pub stack: u32,
    /// Number of data blocks before acquisition stops on its own, 0 for no limit
    pub acquisition_limit: u32,
}

impl AcquisitionConfig {
    /// Size check plus the value constraints a backend can rely on.
    pub fn validated(service: Service, payload: &[u8]) -> Result<Self> {
        let config = Self::from_payload(service, payload)?;
        if config.freq_start >= config.freq_stop {
            return Err(invalid(service, "start frequency must be below stop frequency"));
        }
        if config.bandwidth_divider == 0 || config.bin_divider == 0 {
            return Err(invalid(service, "dividers must be non-zero"));
        }
        Ok(config)
    }
}

impl FixedPayload for AcquisitionConfig {
    const SIZE: usize = 2 * 8 + 4 * 4;

    fn put(&self, out: &mut Vec<u8>) {
        out.put_u64(self.freq_start);
        out.put_u64(self.freq_stop);
        out.put_u32(self.bandwidth_divider);
        out.put_u32(self.bin_divider);
        out.put_u32(self.stack);
        out.put_u32(self.acquisition_limit);
    }

    fn get(buf: &mut &[u8]) -> Self {
        Self {
            freq_start: buf.get_u64(),
            freq_stop: buf.get_u64(),
            bandwidth_divider: buf.get_u32(),
            bin_divider: buf.get_u32(),
            stack: buf.get_u32(),
            acquisition_limit: buf.get_u32(),
        }
    }
}

/// One block of spectral data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpectrumData {
    pub freq_lower: u64,
    pub freq_upper: u64,
    pub freq_increment: u64,
    pub samples: Vec<i32>,
}

impl SpectrumData {
    const HEAD: usize = 3 * 8 + 4;

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEAD + self.samples.len() * 4);
        out.put_u64(self.freq_lower);
        out.put_u64(self.freq_upper);
        out.put_u64(self.freq_increment);
        out.put_u32(self.samples.len() as u32);
        for &sample in &self.samples {
            out.put_i32(sample);
        }
        out
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let service = Service::SpectrumData;
        if payload.len() < Self::HEAD {
            return Err(invalid(service, "truncated spectrum header"));
        }

        let mut buf = payload;
        let freq_lower = buf.get_u64();
        let freq_upper = buf.get_u64();
        let freq_increment = buf.get_u64();
        let count = buf.get_u32() as usize;
        if buf.len() / 4 != count || buf.len() % 4 != 0 {
            return Err(invalid(
                service,
                format!("declared {count} samples, {} bytes follow", buf.len()),
            ));
        }

        let samples = (0..count).map(|_| buf.get_i32()).collect();
        Ok(Self {
            freq_lower,
            freq_upper,
            freq_increment,
            samples,
        })
    }
}

/// Drive status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub busy: bool,
    /// Estimated milliseconds until the current motion completes
    pub eta_ms: u32,
}

impl FixedPayload for Status {
    const SIZE: usize = 8;

    fn put(&self, out: &mut Vec<u8>) {
        out.put_u32(self.busy as u32);
        out.put_u32(self.eta_ms);
    }

    fn get(buf: &mut &[u8]) -> Self {
        Self {
            busy: buf.get_u32() != 0,
            eta_ms: buf.get_u32(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotloadState {
    pub powered: bool,
}

impl FixedPayload for HotloadState {
    const SIZE: usize = 4;

    fn put(&self, out: &mut Vec<u8>) {
        out.put_u32(self.powered as u32);
    }

    fn get(buf: &mut &[u8]) -> Self {
        Self {
            powered: buf.get_u32() != 0,
        }
    }
}

/// Longest text the 16-bit length prefix can describe.
pub const MAX_TEXT_LEN: usize = u16::MAX as usize;

/// Encode a length-prefixed text payload. Text longer than [`MAX_TEXT_LEN`]
/// is cut at the last character boundary that fits.
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut end = text.len().min(MAX_TEXT_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let text = &text[..end];

    let mut out = Vec::with_capacity(2 + text.len());
    out.put_u16(text.len() as u16);
    out.extend_from_slice(text.as_bytes());
    out
}

/// Decode a length-prefixed text payload.
///
/// The declared length must equal both the number of trailing bytes and the
/// string length of those bytes (no embedded NUL), and the bytes must be UTF-8.
/// Any violation is [`ProtocolError::MalformedText`].
pub fn decode_text(payload: &[u8]) -> Result<&str> {
    if payload.len() < 2 {
        return Err(ProtocolError::MalformedText(constants::ERR_TEXT_LENGTH));
    }

    let mut buf = payload;
    let declared = buf.get_u16() as usize;
    if declared != buf.len() {
        return Err(ProtocolError::MalformedText(constants::ERR_TEXT_LENGTH));
    }
    if buf.contains(&0) {
        return Err(ProtocolError::MalformedText(constants::ERR_TEXT_NUL));
    }

    std::str::from_utf8(buf).map_err(|_| ProtocolError::MalformedText(constants::ERR_TEXT_UTF8))
}

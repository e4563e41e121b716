//! Local horizon profile: the station's obstruction mask as an ordered list of
//! azimuth/elevation points.
//!
//! Text format, one point per line, degrees separated by whitespace:
//! ```text
//! # az   el
//! 0.0    4.5
//! 90.0   12.0
//! ```

use std::path::Path;
use std::str::FromStr;

use tracing::info;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::AzEl;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HorizonProfile {
    points: Vec<AzEl>,
}

impl HorizonProfile {
    pub fn new(points: Vec<AzEl>) -> Self {
        Self { points }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Failed to read horizon file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let profile: Self = contents.parse()?;
        info!(
            path = %path.as_ref().display(),
            points = profile.len(),
            "Horizon profile loaded"
        );
        Ok(profile)
    }

    pub fn points(&self) -> &[AzEl] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromStr for HorizonProfile {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let mut points = Vec::new();

        for (index, raw) in s.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let parse_error = |reason: String| ProtocolError::HorizonParse {
                line: index + 1,
                reason,
            };

            let mut fields = line.split_whitespace();
            let (Some(az), Some(el), None) = (fields.next(), fields.next(), fields.next()) else {
                return Err(parse_error("expected two columns".into()));
            };

            let az: f64 = az
                .parse()
                .map_err(|e| parse_error(format!("azimuth {az:?}: {e}")))?;
            let el: f64 = el
                .parse()
                .map_err(|e| parse_error(format!("elevation {el:?}: {e}")))?;

            if !(0.0..=360.0).contains(&az) || !(-90.0..=90.0).contains(&el) {
                return Err(parse_error(format!("point ({az}, {el}) out of range")));
            }

            points.push(AzEl::new(az, el));
        }

        if points.is_empty() {
            return Err(ProtocolError::ConfigError(
                constants::ERR_EMPTY_HORIZON.into(),
            ));
        }

        Ok(Self { points })
    }
}

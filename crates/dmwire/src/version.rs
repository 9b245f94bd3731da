//! Server version parsing and version-gated protocol features.

use std::cmp::Ordering;
use std::fmt;

use dmwire_core::{Error, ProtocolError, Result};

/// Oldest server the handshake accepts.
pub const MIN_SERVER_VERSION: ServerVersion = ServerVersion::new([7, 0, 0, 9]);

/// Dotted server version, compared component by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServerVersion {
    parts: [u32; 4],
}

impl ServerVersion {
    pub const fn new(parts: [u32; 4]) -> Self {
        Self { parts }
    }

    /// Parse `"8.1.3.62"`. Missing components are zero and any trailing
    /// non-numeric suffix on a component is ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = [0u32; 4];
        let mut seen = 0;
        for (slot, piece) in parts.iter_mut().zip(text.trim().split('.')) {
            let digits: String = piece.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            *slot = digits.parse().map_err(|_| version_error(text))?;
            seen += 1;
        }
        if seen == 0 {
            return Err(version_error(text));
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> [u32; 4] {
        self.parts
    }
}

fn version_error(text: &str) -> Error {
    Error::Protocol(ProtocolError {
        message: format!("unparseable server version '{}'", text),
        raw_data: Some(text.as_bytes().to_vec()),
        source: None,
    })
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.parts;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// Behaviors toggled by the server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Execute requests use code 13 instead of 6
    Execute2,
    /// Empty LOBs compare the Oracle way
    LobEmptyCompOrcl,
    /// Login response carries the extended session block
    Malini2,
    /// LOB locators carry table/column/row fields
    ExtendedLobLocator,
}

/// `(feature, version it must exceed)`.
///
/// The exact intent behind each threshold is undocumented; each flag
/// simply switches on for servers newer than the listed build.
pub const FEATURE_TABLE: &[(Feature, ServerVersion)] = &[
    (Feature::Execute2, ServerVersion::new([7, 1, 2, 128])),
    (Feature::LobEmptyCompOrcl, ServerVersion::new([7, 1, 5, 144])),
    (Feature::ExtendedLobLocator, ServerVersion::new([7, 1, 6, 123])),
    (Feature::Malini2, ServerVersion::new([8, 0, 0, 73])),
];

/// Features enabled for a particular server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet {
    pub execute2: bool,
    pub lob_empty_comp_orcl: bool,
    pub malini2: bool,
    pub extended_lob_locator: bool,
}

impl FeatureSet {
    pub fn for_version(version: ServerVersion) -> Self {
        let mut set = FeatureSet::default();
        for (feature, threshold) in FEATURE_TABLE {
            if version > *threshold {
                set.enable(*feature);
            }
        }
        set
    }

    fn enable(&mut self, feature: Feature) {
        match feature {
            Feature::Execute2 => self.execute2 = true,
            Feature::LobEmptyCompOrcl => self.lob_empty_comp_orcl = true,
            Feature::Malini2 => self.malini2 = true,
            Feature::ExtendedLobLocator => self.extended_lob_locator = true,
        }
    }

    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::Execute2 => self.execute2,
            Feature::LobEmptyCompOrcl => self.lob_empty_comp_orcl,
            Feature::Malini2 => self.malini2,
            Feature::ExtendedLobLocator => self.extended_lob_locator,
        }
    }
}

//! Canonical device identity.
//!
//! A [`DeviceId`] names one piece of equipment independently of the backend that
//! drives it. It is created when a backend enumerates hardware or when a persisted
//! configuration is loaded, and never changes afterwards.
//!
//! # Encoding
//!
//! The only serialized form is a URI-like string:
//!
//! ```text
//! device://<kind>/<backend_key>/<backend_id>#<display_name>
//! ```
//!
//! Every component after the kind is percent-encoded, so backend ids such as
//! `ASCOM.Simulator.Telescope` or `COM3/1` survive unchanged. The encoding is used in
//! configuration files and logs and must stay stable across releases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{AppResult, ImagingError};

const SCHEME: &str = "device://";

/// Equipment class a device belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Telescope mount
    Mount,
    /// Imaging camera
    Camera,
    /// Guiding application
    Guider,
    /// Electronic focuser
    Focuser,
    /// Filter wheel
    #[serde(rename = "filterwheel")]
    FilterWheel,
    /// Dust cover or flat panel
    Cover,
    /// Power or dew-heater switch box
    Switch,
    /// Placeholder for an empty slot
    None,
}

impl DeviceKind {
    /// All kinds, in declaration order.
    pub const ALL: [DeviceKind; 8] = [
        DeviceKind::Mount,
        DeviceKind::Camera,
        DeviceKind::Guider,
        DeviceKind::Focuser,
        DeviceKind::FilterWheel,
        DeviceKind::Cover,
        DeviceKind::Switch,
        DeviceKind::None,
    ];

    /// Token used in the canonical encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Mount => "mount",
            DeviceKind::Camera => "camera",
            DeviceKind::Guider => "guider",
            DeviceKind::Focuser => "focuser",
            DeviceKind::FilterWheel => "filterwheel",
            DeviceKind::Cover => "cover",
            DeviceKind::Switch => "switch",
            DeviceKind::None => "none",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ImagingError::UnknownKind(s.to_string()))
    }
}

/// Immutable, backend-independent identifier for a piece of equipment.
///
/// Two identities are equal iff kind, backend id and backend key match.
/// `display_name` is metadata and never takes part in equality or hashing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId {
    kind: DeviceKind,
    backend_id: String,
    display_name: String,
    backend_key: String,
}

impl DeviceId {
    /// Build an identity from its components.
    ///
    /// The backend id and backend key must be non-empty; the display name may be
    /// empty. Every identity built here survives [`encode`](Self::encode) followed by
    /// [`parse`](Self::parse).
    pub fn new(
        kind: DeviceKind,
        backend_id: impl Into<String>,
        display_name: impl Into<String>,
        backend_key: impl Into<String>,
    ) -> AppResult<Self> {
        let id = Self {
            kind,
            backend_id: backend_id.into(),
            display_name: display_name.into(),
            backend_key: backend_key.into(),
        };
        id.check_components(&id.encode())?;
        Ok(id)
    }

    fn check_components(&self, input: &str) -> AppResult<()> {
        let reason = if self.backend_key.is_empty() {
            "empty backend key"
        } else if self.backend_id.is_empty() {
            "empty backend id"
        } else {
            return Ok(());
        };
        Err(ImagingError::MalformedIdentity {
            input: input.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Equipment class
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Backend-specific id (ProgID, serial number, SDK index...).
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Human-readable name, not part of equality
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Key of the backend that can instantiate a driver for this device.
    pub fn backend_key(&self) -> &str {
        &self.backend_key
    }

    /// Canonical string form, see the module docs.
    pub fn encode(&self) -> String {
        format!(
            "{SCHEME}{}/{}/{}#{}",
            self.kind,
            urlencoding::encode(&self.backend_key),
            urlencoding::encode(&self.backend_id),
            urlencoding::encode(&self.display_name),
        )
    }

    /// Parse the canonical string form.
    ///
    /// A missing `#<display_name>` fragment falls back to the backend id.
    pub fn parse(encoded: &str) -> AppResult<Self> {
        let malformed = |reason: &str| ImagingError::MalformedIdentity {
            input: encoded.to_string(),
            reason: reason.to_string(),
        };

        let rest = encoded
            .strip_prefix(SCHEME)
            .ok_or_else(|| malformed("missing 'device://' scheme"))?;
        let (path, fragment) = match rest.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (rest, None),
        };

        let parts: Vec<&str> = path.split('/').collect();
        let [kind, backend_key, backend_id] = parts[..] else {
            return Err(malformed("expected <kind>/<backend_key>/<backend_id>"));
        };

        let kind: DeviceKind = kind.parse()?;
        let decode = |part: &str, what: &str| {
            urlencoding::decode(part)
                .map(|s| s.into_owned())
                .map_err(|_| malformed(&format!("{what} is not valid UTF-8")))
        };
        let backend_key = decode(backend_key, "backend key")?;
        let backend_id = decode(backend_id, "backend id")?;
        let display_name = match fragment {
            Some(fragment) => decode(fragment, "display name")?,
            None => backend_id.clone(),
        };

        let id = Self {
            kind,
            backend_id,
            display_name,
            backend_key,
        };
        id.check_components(encoded)?;
        Ok(id)
    }

    /// Returns `self` if it is of the `expected` kind.
    pub fn expect_kind(&self, expected: DeviceKind) -> AppResult<&Self> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(ImagingError::KindMismatch {
                expected,
                actual: self.kind,
            })
        }
    }
}

impl PartialEq for DeviceId {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.backend_id == other.backend_id
            && self.backend_key == other.backend_key
    }
}

impl Eq for DeviceId {}

impl Hash for DeviceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.backend_id.hash(state);
        self.backend_key.hash(state);
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.kind, self.display_name, self.backend_key)
    }
}

impl FromStr for DeviceId {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ImagingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telescope() -> DeviceId {
        DeviceId::new(
            DeviceKind::Mount,
            "ASCOM.Simulator.Telescope",
            "Telescope Simulator",
            "ascom",
        )
        .unwrap()
    }

    #[test]
    fn test_encode_format() {
        assert_eq!(
            telescope().encode(),
            "device://mount/ascom/ASCOM.Simulator.Telescope#Telescope%20Simulator"
        );
    }

    #[test]
    fn test_display_name_not_part_of_equality() {
        let a = telescope();
        let b = DeviceId::new(
            DeviceKind::Mount,
            "ASCOM.Simulator.Telescope",
            "Renamed",
            "ascom",
        )
        .unwrap();
        assert_eq!(a, b);

        let c =
            DeviceId::new(DeviceKind::Mount, "ASCOM.Simulator.Telescope", "x", "alpaca").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_parse_without_fragment_uses_backend_id() {
        let id = DeviceId::parse("device://camera/zwo/0").unwrap();
        assert_eq!(id.kind(), DeviceKind::Camera);
        assert_eq!(id.display_name(), "0");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            DeviceId::parse("mount/ascom/x"),
            Err(ImagingError::MalformedIdentity { .. })
        ));
        assert!(matches!(
            DeviceId::parse("device://mount/ascom"),
            Err(ImagingError::MalformedIdentity { .. })
        ));
        assert!(matches!(
            DeviceId::parse("device://dome/ascom/x#y"),
            Err(ImagingError::UnknownKind(ref k)) if k == "dome"
        ));
        assert!(matches!(
            DeviceId::parse("device://mount//x"),
            Err(ImagingError::MalformedIdentity { .. })
        ));
        assert!(matches!(
            DeviceId::parse("device://mount/ascom/%FF"),
            Err(ImagingError::MalformedIdentity { .. })
        ));
    }

    #[test]
    fn test_new_rejects_empty_components() {
        assert!(matches!(
            DeviceId::new(DeviceKind::Mount, "", "Unnamed", "sim"),
            Err(ImagingError::MalformedIdentity { ref reason, .. }) if reason == "empty backend id"
        ));
        assert!(matches!(
            DeviceId::new(DeviceKind::Mount, "eq6", "EQ6", ""),
            Err(ImagingError::MalformedIdentity { ref reason, .. }) if reason == "empty backend key"
        ));
        assert!(DeviceId::new(DeviceKind::Mount, "eq6", "", "sim").is_ok());
    }

    #[test]
    fn test_expect_kind() {
        let mount = telescope();
        assert!(mount.expect_kind(DeviceKind::Mount).is_ok());
        assert!(matches!(
            mount.expect_kind(DeviceKind::Camera),
            Err(ImagingError::KindMismatch {
                expected: DeviceKind::Camera,
                actual: DeviceKind::Mount
            })
        ));
    }

    #[test]
    fn test_kind_tokens_round_trip() {
        for kind in DeviceKind::ALL {
            assert_eq!(kind.as_str().parse::<DeviceKind>().unwrap(), kind);
        }
        assert_eq!("FilterWheel".parse::<DeviceKind>().unwrap(), DeviceKind::FilterWheel);
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let json = serde_json::to_string(&telescope()).unwrap();
        assert_eq!(
            json,
            "\"device://mount/ascom/ASCOM.Simulator.Telescope#Telescope%20Simulator\""
        );
        let back: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.display_name(), "Telescope Simulator");
    }
}

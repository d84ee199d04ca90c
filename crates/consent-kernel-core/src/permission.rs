//! Permission sets: the four independent capabilities attached to a grant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// A single capability a requester may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    View,
    Edit,
    Download,
    Screenshot,
}

impl Capability {
    /// All capabilities, in bit order.
    pub const ALL: [Capability; 4] = [
        Capability::View,
        Capability::Edit,
        Capability::Download,
        Capability::Screenshot,
    ];

    const fn bit(self) -> u8 {
        match self {
            Capability::View => 0b0001,
            Capability::Edit => 0b0010,
            Capability::Download => 0b0100,
            Capability::Screenshot => 0b1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Edit => "edit",
            Capability::Download => "download",
            Capability::Screenshot => "screenshot",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Capability::View),
            "edit" => Ok(Capability::Edit),
            "download" => Ok(Capability::Download),
            "screenshot" => Ok(Capability::Screenshot),
            other => Err(ValidationError::UnknownCapability(other.to_string())),
        }
    }
}

/// The four-capability set carried by a Granted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    pub view: bool,
    pub edit: bool,
    pub download: bool,
    pub screenshot: bool,
}

impl PermissionSet {
    /// View-only access, the most common grant.
    pub const fn view_only() -> Self {
        Self {
            view: true,
            edit: false,
            download: false,
            screenshot: false,
        }
    }

    /// Every capability.
    pub const fn all() -> Self {
        Self {
            view: true,
            edit: true,
            download: true,
            screenshot: true,
        }
    }

    /// Whether `capability` is granted.
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::View => self.view,
            Capability::Edit => self.edit,
            Capability::Download => self.download,
            Capability::Screenshot => self.screenshot,
        }
    }

    /// Builder-style toggle.
    pub fn with(mut self, capability: Capability, allowed: bool) -> Self {
        match capability {
            Capability::View => self.view = allowed,
            Capability::Edit => self.edit = allowed,
            Capability::Download => self.download = allowed,
            Capability::Screenshot => self.screenshot = allowed,
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        !(self.view || self.edit || self.download || self.screenshot)
    }

    /// A grant must carry at least one capability.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyPermissions);
        }
        Ok(())
    }

    /// Packed form for storage.
    pub fn to_bits(&self) -> u8 {
        Capability::ALL
            .iter()
            .filter(|c| self.allows(**c))
            .fold(0, |acc, c| acc | c.bit())
    }

    /// Inverse of [`to_bits`](Self::to_bits). Unknown bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        Capability::ALL
            .iter()
            .fold(Self::default(), |set, c| set.with(*c, bits & c.bit() != 0))
    }

    /// Granted capabilities, in bit order.
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|c| self.allows(*c))
            .collect()
    }
}

//! Attachment state resolution.
//!
//! A request carries an [`AttachmentsMask`] saying which attachment
//! information the caller wants and which volumes to keep. [`resolve`]
//! normalizes a volume's [`VolumeAttachmentState`] relative to the calling
//! instance and decides whether the volume stays in the response.
//!
//! # Examples
//!
//! ```
//! use volplane::attachments::{resolve, AttachmentsMask};
//! use volplane::types::{InstanceId, Volume, VolumeAttachmentState};
//!
//! let mut vol = Volume::new("vol-1", "data");
//! let caller = InstanceId::new("mock", "i-1");
//!
//! assert!(!resolve(&mut vol, Some(&caller), AttachmentsMask::ONLY_ATTACHED));
//! assert_eq!(vol.attachment_state, VolumeAttachmentState::Available);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use crate::error::Error;
use crate::types::{InstanceId, Volume, VolumeAttachmentState};

/// Bit flags describing the attachment information a request wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttachmentsMask(u32);

impl AttachmentsMask {
    /// No attachment information; attachments are stripped.
    pub const NONE: Self = Self(0);
    /// Attachment information is requested.
    pub const REQUESTED: Self = Self(1);
    /// Resolve attachments relative to the caller's instance.
    pub const MINE: Self = Self(1 << 1);
    /// Include device names for the caller's instance. Drivers keep a
    /// device name only when it is among the caller's local devices, and
    /// fail with [`Error::MissingLocalDevices`] when none were sent.
    ///
    /// [`Error::MissingLocalDevices`]: crate::Error::MissingLocalDevices
    pub const DEVICES: Self = Self(1 << 2);
    /// Keep attached volumes.
    pub const ATTACHED: Self = Self(1 << 3);
    /// Keep unattached volumes.
    pub const UNATTACHED: Self = Self(1 << 4);

    pub const FOR_INSTANCE: Self = Self(Self::REQUESTED.0 | Self::MINE.0);
    pub const WITH_DEVICES_FOR_INSTANCE: Self = Self(Self::FOR_INSTANCE.0 | Self::DEVICES.0);
    pub const ONLY_ATTACHED: Self = Self(Self::REQUESTED.0 | Self::ATTACHED.0);
    pub const ONLY_UNATTACHED: Self = Self(Self::REQUESTED.0 | Self::UNATTACHED.0);
    pub const ATTACHED_TO_INSTANCE: Self = Self(Self::FOR_INSTANCE.0 | Self::ATTACHED.0);
    pub const ATTACHED_TO_INSTANCE_OR_UNATTACHED: Self =
        Self(Self::ATTACHED_TO_INSTANCE.0 | Self::UNATTACHED.0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn requested(&self) -> bool {
        self.contains(Self::REQUESTED)
    }

    pub fn mine(&self) -> bool {
        self.contains(Self::MINE)
    }

    pub fn devices(&self) -> bool {
        self.contains(Self::DEVICES)
    }

    pub fn attached(&self) -> bool {
        self.contains(Self::ATTACHED)
    }

    pub fn unattached(&self) -> bool {
        self.contains(Self::UNATTACHED)
    }

    /// Whether the caller's instance ID must be known to honor this mask.
    pub fn requires_instance_id(&self) -> bool {
        self.mine() || self.devices()
    }
}

impl BitOr for AttachmentsMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AttachmentsMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AttachmentsMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses a query value.
///
/// Accepts an integer bit mask, `true` (attachments with devices for the
/// caller's instance), `false`, or a comma-separated list of `requested`,
/// `mine`, `devices`, `attached` and `unattached`. Any named flag implies
/// `requested`.
impl FromStr for AttachmentsMask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::NONE);
        }
        if let Ok(bits) = trimmed.parse::<u32>() {
            return Ok(Self(bits));
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Ok(Self::WITH_DEVICES_FOR_INSTANCE);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Ok(Self::NONE);
        }

        let mut mask = Self::REQUESTED;
        for flag in trimmed.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            mask |= match flag.to_ascii_lowercase().as_str() {
                "req" | "requested" => Self::REQUESTED,
                "mine" => Self::MINE,
                "dev" | "devices" => Self::DEVICES,
                "attached" => Self::ATTACHED,
                "unattached" => Self::UNATTACHED,
                _ => {
                    return Err(Error::InvalidMask {
                        value: s.to_string(),
                    })
                },
            };
        }
        Ok(mask)
    }
}

impl Serialize for AttachmentsMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for AttachmentsMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bits(u32),
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bits(bits) => Ok(Self(bits)),
            Raw::Flag(true) => Ok(Self::WITH_DEVICES_FOR_INSTANCE),
            Raw::Flag(false) => Ok(Self::NONE),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Normalizes `volume.attachment_state` and decides inclusion.
///
/// Returns `true` if the volume belongs in the response. With an empty mask
/// the attachments are stripped and the volume is always kept. A state the
/// driver already set is trusted; otherwise the state is derived from the
/// attachment list, matching instance IDs without regard to case.
pub fn resolve(volume: &mut Volume, caller: Option<&InstanceId>, mask: AttachmentsMask) -> bool {
    if mask.is_none() {
        volume.attachments.clear();
        return true;
    }

    if volume.attachment_state.is_set() {
        tracing::debug!(
            volume = %volume.id,
            state = volume.attachment_state.as_str(),
            "deferring to driver-specified attachment state"
        );
    } else {
        volume.attachment_state = compute_state(volume, caller);
    }

    let keep = include(volume.attachment_state, mask);
    tracing::debug!(
        volume = %volume.id,
        state = volume.attachment_state.as_str(),
        mask = mask.bits(),
        keep,
        "resolved attachment state"
    );
    keep
}

fn compute_state(volume: &Volume, caller: Option<&InstanceId>) -> VolumeAttachmentState {
    if volume.attachments.is_empty() {
        return VolumeAttachmentState::Available;
    }
    let mine = caller.is_some_and(|iid| {
        volume.attachments.iter().any(|a| {
            a.instance_id
                .as_ref()
                .is_some_and(|aid| aid.id.eq_ignore_ascii_case(&iid.id))
        })
    });
    if mine {
        VolumeAttachmentState::Attached
    } else {
        VolumeAttachmentState::Unavailable
    }
}

/// Inclusion rules, evaluated in order; the first match excludes.
fn include(state: VolumeAttachmentState, mask: AttachmentsMask) -> bool {
    use VolumeAttachmentState::{Attached, Available, Unavailable};

    // only attached volumes wanted, this one has no attachments
    if state == Available && mask.attached() && !mask.unattached() {
        return false;
    }
    // only unattached volumes wanted, this one is attached somewhere
    if matches!(state, Attached | Unavailable) && !mask.attached() && mask.unattached() {
        return false;
    }
    // only volumes attached to the caller wanted
    if mask.mine()
        && mask.attached()
        && ((state == Available && !mask.unattached()) || state == Unavailable)
    {
        return false;
    }
    true
}

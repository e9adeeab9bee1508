//! Identifiers and Amounts
//!
//! Newtypes for participant wallets, game sessions, and stakes.
//! All implement `Ord` so they can key `BTreeMap`s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Opaque wallet identifier of a participant.
///
/// Normalized to lowercase so `0xAbC` and `0xabc` are the same wallet.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create from a wallet address string.
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_lowercase())
    }

    /// Get the normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Default display name for a participant created on first contact.
    pub fn default_display_name(&self) -> String {
        let body = self.0.strip_prefix("0x").unwrap_or(&self.0);
        let prefix: String = body.chars().take(6).collect();
        format!("Player_{}", prefix)
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// SESSION ID
// =============================================================================

/// Unique game session identifier (UUID as bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Hyphenated string form. This is the game identifier fed to the
    /// commitment codec and the result digest.
    pub fn to_uuid_string(&self) -> String {
        self.0.hyphenated().to_string()
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

// =============================================================================
// TRANSACTION REFERENCE
// =============================================================================

/// Ledger transaction reference returned by a settlement submission.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxReference(pub String);

impl TxReference {
    /// Create from the ledger's string form.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get the reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// STAKE
// =============================================================================

/// Decimal places carried by a [`Stake`].
pub const STAKE_DECIMALS: u32 = 6;

/// Base units per whole stake unit.
pub const STAKE_SCALE: u64 = 10u64.pow(STAKE_DECIMALS);

/// Wagered amount in base units (1.0 == 1_000_000).
///
/// Integer so stake buckets compare exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stake(pub u64);

impl Stake {
    /// Create from base units.
    pub const fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    /// Amount in base units.
    pub const fn base_units(self) -> u64 {
        self.0
    }

    /// Whether this is a zero stake.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Scale by basis points (10_000 = 1x), saturating.
    pub fn scale_bps(self, bps: u32) -> u64 {
        let scaled = (self.0 as u128) * (bps as u128) / 10_000;
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for Stake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / STAKE_SCALE;
        let frac = self.0 % STAKE_SCALE;
        if frac == 0 {
            write!(f, "{}.0", whole)
        } else {
            let frac = format!("{:0width$}", frac, width = STAKE_DECIMALS as usize);
            write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
        }
    }
}

/// Error parsing a decimal stake string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakeParseError {
    /// Not a decimal number.
    #[error("invalid stake amount: {0}")]
    Invalid(String),
    /// More fractional digits than [`STAKE_DECIMALS`].
    #[error("stake has more than 6 decimal places")]
    TooPrecise,
    /// Value does not fit.
    #[error("stake amount overflows")]
    Overflow,
}

impl FromStr for Stake {
    type Err = StakeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || (!frac.is_empty() && !digits(frac)) {
            return Err(StakeParseError::Invalid(s.to_string()));
        }
        if frac.len() > STAKE_DECIMALS as usize {
            return Err(StakeParseError::TooPrecise);
        }

        let whole: u64 = whole.parse().map_err(|_| StakeParseError::Overflow)?;
        let frac_units: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = STAKE_DECIMALS as usize);
            padded.parse().map_err(|_| StakeParseError::Invalid(s.to_string()))?
        };

        whole
            .checked_mul(STAKE_SCALE)
            .and_then(|w| w.checked_add(frac_units))
            .map(Stake)
            .ok_or(StakeParseError::Overflow)
    }
}

use crate::gap::constants::*;
use bitflags::bitflags;
use serde::Deserialize;
use std::fmt;

/// GAP roles the local device takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Central,
    Peripheral,
    CentralPeripheral,
}

impl Role {
    /// Whether the device may initiate connections
    pub fn is_central(self) -> bool {
        matches!(self, Role::Central | Role::CentralPeripheral)
    }
}

/// Kind of a peer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Public,
    Random,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        // Bit 1 flags a controller-resolved address; only the kind bit matters here
        match value & 0x01 {
            PUBLIC_ADDRESS => AddressType::Public,
            _ => AddressType::Random,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_ADDRESS,
            AddressType::Random => PRIVATE_ADDRESS,
        }
    }
}

/// How the local device picks its own address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnAddressType {
    PublicStatic,
    PrivateStatic,
    PrivateRandomResolvable,
    PrivateRandomNonResolvable,
}

/// Own address of the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnAddress {
    pub addr_type: OwnAddressType,
    pub bytes: [u8; 6],
}

impl Default for OwnAddress {
    fn default() -> Self {
        Self {
            addr_type: OwnAddressType::PublicStatic,
            bytes: [0; 6],
        }
    }
}

/// Bluetooth device address with its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr {
    pub addr_type: AddressType,
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(addr_type: AddressType, bytes: [u8; 6]) -> Self {
        Self { addr_type, bytes }
    }

    pub fn public(bytes: [u8; 6]) -> Self {
        Self::new(AddressType::Public, bytes)
    }

    pub fn random(bytes: [u8; 6]) -> Self {
        Self::new(AddressType::Random, bytes)
    }

    /// Random address whose two top bits mark it as resolvable private
    pub fn is_resolvable_private(&self) -> bool {
        self.addr_type == AddressType::Random && (self.bytes[5] & 0xC0) == GAP_RSLV_ADDR
    }
}

/// Most significant byte first, the random kind marked with a `/r` suffix
impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().rev().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        match self.addr_type {
            AddressType::Public => Ok(()),
            AddressType::Random => f.write_str("/r"),
        }
    }
}

/// IO capabilities of the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoCapability {
    /// Display only capability
    DisplayOnly,
    /// Display with yes/no capability
    DisplayYesNo,
    /// Keyboard only
    KeyboardOnly,
    /// No input, no output
    NoInputNoOutput,
    /// Both keyboard and display
    KeyboardDisplay,
}

impl IoCapability {
    pub fn to_u8(&self) -> u8 {
        match self {
            IoCapability::DisplayOnly => 0x00,
            IoCapability::DisplayYesNo => 0x01,
            IoCapability::KeyboardOnly => 0x02,
            IoCapability::NoInputNoOutput => 0x03,
            IoCapability::KeyboardDisplay => 0x04,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(IoCapability::DisplayOnly),
            0x01 => Some(IoCapability::DisplayYesNo),
            0x02 => Some(IoCapability::KeyboardOnly),
            0x03 => Some(IoCapability::NoInputNoOutput),
            0x04 => Some(IoCapability::KeyboardDisplay),
            _ => None,
        }
    }

    /// Whether pairing with this capability can offer MITM protection
    pub fn supports_mitm(&self) -> bool {
        *self != IoCapability::NoInputNoOutput
    }
}

/// Link security level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityLevel {
    /// No security
    Level1,
    /// Unauthenticated pairing with encryption
    Level2,
    /// Authenticated pairing with encryption
    Level3,
    /// Authenticated LE Secure Connections pairing with encryption
    Level4,
}

impl SecurityLevel {
    pub fn to_u8(&self) -> u8 {
        match self {
            SecurityLevel::Level1 => 0,
            SecurityLevel::Level2 => 1,
            SecurityLevel::Level3 => 2,
            SecurityLevel::Level4 => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SecurityLevel::Level1),
            1 => Some(SecurityLevel::Level2),
            2 => Some(SecurityLevel::Level3),
            3 => Some(SecurityLevel::Level4),
            _ => None,
        }
    }

    /// MITM protection is needed from level 3 upwards
    pub fn requires_mitm(&self) -> bool {
        *self >= SecurityLevel::Level3
    }

    /// Only level 4 requires Secure Connections pairing
    pub fn requires_secure_connections(&self) -> bool {
        *self == SecurityLevel::Level4
    }
}

bitflags! {
    /// Authentication requirements bitmask as exchanged with the controller
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AuthReq: u8 {
        const BOND = 0x01;
        const MITM = 0x04;
        const SECURE = 0x08;
        const KEYPRESS = 0x10;
    }
}

impl AuthReq {
    /// Build the mask from individual requirement flags
    pub fn from_flags(bond: bool, mitm: bool, secure: bool) -> Self {
        let mut auth = AuthReq::empty();
        auth.set(AuthReq::BOND, bond);
        auth.set(AuthReq::MITM, mitm);
        auth.set(AuthReq::SECURE, secure);
        auth
    }
}

/// Security level reached by a link with the given authentication mask.
///
/// MITM protection gives level 3, plus Secure Connections level 4. Any other
/// non-empty mask is an encrypted but unauthenticated link (level 2); an empty
/// mask means no security at all.
pub fn sec_level_from_auth(auth: AuthReq) -> SecurityLevel {
    if auth.contains(AuthReq::MITM) {
        if auth.contains(AuthReq::SECURE) {
            SecurityLevel::Level4
        } else {
            SecurityLevel::Level3
        }
    } else if auth.intersects(AuthReq::BOND | AuthReq::SECURE | AuthReq::KEYPRESS) {
        SecurityLevel::Level2
    } else {
        SecurityLevel::Level1
    }
}

/// Security level for a pair of `(mitm, secure)` flags
pub fn sec_level(mitm: bool, secure: bool) -> SecurityLevel {
    sec_level_from_auth(AuthReq::from_flags(false, mitm, secure))
}

/// Security level of a link the controller reports as encrypted with `auth`.
///
/// Encryption alone is level 2, whatever else the mask carries.
pub fn encrypted_sec_level(auth: AuthReq) -> SecurityLevel {
    match sec_level_from_auth(auth) {
        SecurityLevel::Level1 => SecurityLevel::Level2,
        level => level,
    }
}

/// Connection parameters requested for a new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub slave_latency: u16,
    pub sup_timeout: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            interval_min: LE_CONN_INTERVAL_MIN,
            interval_max: LE_CONN_INTERVAL_MAX,
            slave_latency: LE_CONN_LATENCY,
            sup_timeout: LE_SUPERVISION_TIMEOUT,
        }
    }
}

// Address kinds
pub const PUBLIC_ADDRESS: u8 = 0x00;
pub const PRIVATE_ADDRESS: u8 = 0x01;

// Top bits of a resolvable private address
pub const GAP_RSLV_ADDR: u8 = 0x40;

// LE scan parameters
pub const LE_SCAN_INTERVAL: u16 = 0x0010; // 10 ms
pub const LE_SCAN_WINDOW: u16 = 0x0010; // 10 ms

// LE connection parameters
pub const LE_CONN_INTERVAL_MIN: u16 = 0x0006; // 7.5 ms
pub const LE_CONN_INTERVAL_MAX: u16 = 0x0008; // 10 ms
pub const LE_CONN_LATENCY: u16 = 0x0000;
pub const LE_SUPERVISION_TIMEOUT: u16 = 0x0048; // 720 ms
pub const LE_MIN_CE_LENGTH: u16 = 0x0000;
pub const LE_MAX_CE_LENGTH: u16 = 0x0008;

// Reason sent with a locally initiated disconnection
pub const REMOTE_USER_TERMINATED_CON: u8 = 0x13;

// Largest value a displayed or entered passkey may take
pub const PASSKEY_MAX: u32 = 999_999;

// Encryption key size negotiated for generated LTKs
pub const ENC_KEY_SIZE: u8 = 16;

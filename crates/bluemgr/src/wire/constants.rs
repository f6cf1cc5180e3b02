//! Controller protocol constants
//!
//! Task identifiers, message identifiers, operation codes and status codes used
//! on the message interface between the host manager and the link-layer
//! controller.

// Envelope categories (high byte of the envelope opcode)
pub const CATEGORY_STACK_MSG: u8 = 0x00;
pub const CATEGORY_ADAPTER_MSG: u8 = 0x01;

// Task identifiers
pub const TASK_ID_L2CC: u16 = 10;
pub const TASK_ID_GAPM: u16 = 13;
pub const TASK_ID_GAPC: u16 = 14;
pub const TASK_ID_APP: u16 = 15;
pub const TASK_ID_GTL: u16 = 16;

/// First message identifier owned by a task
pub const fn task_first_msg(task: u16) -> u16 {
    task << 10
}

// Connection index meaning "no connection"
pub const CONN_IDX_INVALID: u16 = 0xFFFF;

// L2CC messages
pub const L2CC_PDU_SEND_REQ: u16 = task_first_msg(TASK_ID_L2CC);
pub const L2CC_PDU_RECV_IND: u16 = L2CC_PDU_SEND_REQ + 1;
pub const L2CC_PDU_SEND_RSP: u16 = L2CC_PDU_SEND_REQ + 2;
pub const L2CC_LECNX_DATA_RECV_IND: u16 = L2CC_PDU_SEND_REQ + 3;

// GAPM messages
pub const GAPM_CMP_EVT: u16 = task_first_msg(TASK_ID_GAPM);
pub const GAPM_DEVICE_READY_IND: u16 = GAPM_CMP_EVT + 1;
pub const GAPM_RESET_CMD: u16 = GAPM_CMP_EVT + 2;
pub const GAPM_CANCEL_CMD: u16 = GAPM_CMP_EVT + 3;
pub const GAPM_START_CONNECTION_CMD: u16 = GAPM_CMP_EVT + 0x14;
pub const GAPM_RESOLV_ADDR_CMD: u16 = GAPM_CMP_EVT + 0x17;
pub const GAPM_ADDR_SOLVED_IND: u16 = GAPM_CMP_EVT + 0x18;

// GAPM operations
pub const GAPM_NO_OP: u8 = 0x00;
pub const GAPM_RESET: u8 = 0x01;
pub const GAPM_CANCEL: u8 = 0x02;
pub const GAPM_CONNECTION_DIRECT: u8 = 0x13;
pub const GAPM_RESOLV_ADDR: u8 = 0x17;

// GAPM own address source for connection establishment
pub const GAPM_STATIC_ADDR: u8 = 0x00;
pub const GAPM_GEN_RSLV_ADDR: u8 = 0x01;
pub const GAPM_GEN_NON_RSLV_ADDR: u8 = 0x02;

// GAPC messages
pub const GAPC_CMP_EVT: u16 = task_first_msg(TASK_ID_GAPC);
pub const GAPC_CONNECTION_REQ_IND: u16 = GAPC_CMP_EVT + 0x01;
pub const GAPC_CONNECTION_CFM: u16 = GAPC_CMP_EVT + 0x02;
pub const GAPC_DISCONNECT_IND: u16 = GAPC_CMP_EVT + 0x03;
pub const GAPC_DISCONNECT_CMD: u16 = GAPC_CMP_EVT + 0x04;
pub const GAPC_GET_INFO_CMD: u16 = GAPC_CMP_EVT + 0x05;
pub const GAPC_CON_RSSI_IND: u16 = GAPC_CMP_EVT + 0x09;
pub const GAPC_BOND_CMD: u16 = GAPC_CMP_EVT + 0x12;
pub const GAPC_BOND_REQ_IND: u16 = GAPC_CMP_EVT + 0x13;
pub const GAPC_BOND_CFM: u16 = GAPC_CMP_EVT + 0x14;
pub const GAPC_BOND_IND: u16 = GAPC_CMP_EVT + 0x15;
pub const GAPC_ENCRYPT_CMD: u16 = GAPC_CMP_EVT + 0x16;
pub const GAPC_ENCRYPT_REQ_IND: u16 = GAPC_CMP_EVT + 0x17;
pub const GAPC_ENCRYPT_CFM: u16 = GAPC_CMP_EVT + 0x18;
pub const GAPC_ENCRYPT_IND: u16 = GAPC_CMP_EVT + 0x19;
pub const GAPC_SECURITY_CMD: u16 = GAPC_CMP_EVT + 0x1A;
pub const GAPC_SECURITY_IND: u16 = GAPC_CMP_EVT + 0x1B;
pub const GAPC_SIGN_COUNTER_IND: u16 = GAPC_CMP_EVT + 0x1C;
pub const GAPC_LECB_CREATE_CMD: u16 = GAPC_CMP_EVT + 0x1E;
pub const GAPC_LECB_DESTROY_CMD: u16 = GAPC_CMP_EVT + 0x1F;
pub const GAPC_LECB_CONNECT_CMD: u16 = GAPC_CMP_EVT + 0x20;
pub const GAPC_LECB_CONNECT_REQ_IND: u16 = GAPC_CMP_EVT + 0x21;
pub const GAPC_LECB_CONNECT_IND: u16 = GAPC_CMP_EVT + 0x22;
pub const GAPC_LECB_CONNECT_CFM: u16 = GAPC_CMP_EVT + 0x23;
pub const GAPC_LECB_ADD_CMD: u16 = GAPC_CMP_EVT + 0x24;
pub const GAPC_LECB_ADD_IND: u16 = GAPC_CMP_EVT + 0x25;
pub const GAPC_LECB_DISCONNECT_CMD: u16 = GAPC_CMP_EVT + 0x26;
pub const GAPC_LECB_DISCONNECT_IND: u16 = GAPC_CMP_EVT + 0x27;

// GAPC operations
pub const GAPC_NO_OP: u8 = 0x00;
pub const GAPC_DISCONNECT: u8 = 0x01;
pub const GAPC_GET_CON_RSSI: u8 = 0x07;
pub const GAPC_BOND: u8 = 0x0A;
pub const GAPC_ENCRYPT: u8 = 0x0B;
pub const GAPC_SECURITY_REQ: u8 = 0x0C;
pub const GAPC_LE_CB_CREATE: u8 = 0x0D;
pub const GAPC_LE_CB_DESTROY: u8 = 0x0E;
pub const GAPC_LE_CB_CONNECTION: u8 = 0x0F;
pub const GAPC_LE_CB_DISCONNECTION: u8 = 0x10;
pub const GAPC_LE_CB_ADDITION: u8 = 0x11;

// Bond request / bond indication kinds
pub const GAPC_PAIRING_REQ: u8 = 0x00;
pub const GAPC_PAIRING_RSP: u8 = 0x01;
pub const GAPC_PAIRING_SUCCEED: u8 = 0x02;
pub const GAPC_PAIRING_FAILED: u8 = 0x03;
pub const GAPC_TK_EXCH: u8 = 0x04;
pub const GAPC_IRK_EXCH: u8 = 0x05;
pub const GAPC_CSRK_EXCH: u8 = 0x06;
pub const GAPC_LTK_EXCH: u8 = 0x07;
pub const GAPC_REPEATED_ATTEMPT: u8 = 0x08;

// Temporary key sources in a TK exchange
pub const GAP_TK_OOB: u8 = 0x00;
pub const GAP_TK_DISPLAY: u8 = 0x01;
pub const GAP_TK_KEY_ENTRY: u8 = 0x02;
pub const GAP_TK_KEY_CONFIRM: u8 = 0x03;

// Flag set in the connection confirmation when a peer LTK is known
pub const GAPC_LTK_MASK: u8 = 0x80;

// Key distribution bits
pub const GAP_KDIST_ENCKEY: u8 = 0x01;
pub const GAP_KDIST_IDKEY: u8 = 0x02;
pub const GAP_KDIST_SIGNKEY: u8 = 0x04;

// GAP status codes
pub const GAP_ERR_NO_ERROR: u8 = 0x00;
pub const GAP_ERR_INVALID_PARAM: u8 = 0x40;
pub const GAP_ERR_PROTOCOL_PROBLEM: u8 = 0x41;
pub const GAP_ERR_NOT_SUPPORTED: u8 = 0x42;
pub const GAP_ERR_COMMAND_DISALLOWED: u8 = 0x43;
pub const GAP_ERR_CANCELED: u8 = 0x44;
pub const GAP_ERR_TIMEOUT: u8 = 0x45;
pub const GAP_ERR_DISCONNECTED: u8 = 0x46;
pub const GAP_ERR_NOT_FOUND: u8 = 0x47;
pub const GAP_ERR_REJECTED: u8 = 0x48;
pub const GAP_ERR_PRIVACY_CFG_PB: u8 = 0x49;
pub const GAP_ERR_INSUFF_RESOURCES: u8 = 0x4B;

// Link-layer status codes reported through completion events
pub const LL_ERR_INVALID_HCI_PARAM: u8 = 0x12;
pub const LL_ERR_UNSPECIFIED_ERROR: u8 = 0x1F;
pub const LL_ERR_COMMAND_DISALLOWED: u8 = 0x0C;

// SMP pairing failure codes
pub const SMP_ERROR_PAIRING_NOT_SUPPORTED: u8 = 0x05;
pub const SMP_ERROR_REM_PAIRING_NOT_SUPPORTED: u8 = 0x85;
pub const SMP_ERROR_ENC_KEY_MISSING: u8 = 0xF1;

// L2CAP status codes
pub const L2C_ERR_CONNECTION_LOST: u8 = 0x30;
pub const L2C_ERR_INVALID_MTU_EXCEED: u8 = 0x31;
pub const L2C_ERR_INVALID_CID: u8 = 0x33;
pub const L2C_ERR_NO_RES_AVAIL: u8 = 0x35;
pub const L2C_ERR_LEPSM_NOT_SUPP: u8 = 0x3A;
pub const L2C_ERR_INSUFF_CREDIT: u8 = 0x3B;

// LE credit based connection response codes
pub const L2C_CB_CON_SUCCESS: u16 = 0x0000;
pub const L2C_CB_CON_LEPSM_NOT_SUPP: u16 = 0x0002;
pub const L2C_CB_CON_NO_RES_AVAIL: u16 = 0x0004;
pub const L2C_CB_CON_INS_AUTH: u16 = 0x0005;
pub const L2C_CB_CON_INS_AUTHOR: u16 = 0x0006;
pub const L2C_CB_CON_INS_EKS: u16 = 0x0007;
pub const L2C_CB_CON_INS_ENCRYPTION: u16 = 0x0008;

// Default ATT MTU on a fresh connection
pub const ATT_DEFAULT_MTU: u16 = 23;

// Bit in the service changed CCC value enabling indications
pub const GATT_CCC_INDICATIONS: u16 = 0x0002;

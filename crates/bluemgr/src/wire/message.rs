//! Wire envelope structures and parsing
//!
//! Every message exchanged with the controller travels in an [`Envelope`].
//! Stack protocol messages carry a [`WireMessage`] addressed task to task;
//! adapter messages are local housekeeping between the manager and the
//! transport.

use crate::error::WireError;
use crate::wire::constants::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;

/// Size of the stack message header: msg_id, dest_id, src_id, param_len
pub const WIRE_HEADER_LEN: usize = 8;

/// Largest parameter block the 16-bit length field can describe
pub const MAX_PARAM_LEN: usize = u16::MAX as usize;

/// Compose a per-connection task identifier
pub fn task_id(conn_idx: u16, base_task: u16) -> u16 {
    (conn_idx << 8) | (base_task & 0xFF)
}

/// Recover the connection index embedded in a task identifier
pub fn conn_of(task: u16) -> u16 {
    task >> 8
}

/// A stack protocol message
#[derive(Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub msg_id: u16,
    pub dest_id: u16,
    pub src_id: u16,
    pub param: Vec<u8>,
}

impl WireMessage {
    /// Message from the host to a controller task
    pub fn new(msg_id: u16, dest_task: u16, param: Vec<u8>) -> Self {
        Self {
            msg_id,
            dest_id: dest_task,
            src_id: TASK_ID_GTL,
            param,
        }
    }

    /// Message from the host to the per-connection instance of a controller task
    pub fn with_conn(msg_id: u16, dest_task: u16, conn_idx: u16, param: Vec<u8>) -> Self {
        Self::new(msg_id, task_id(conn_idx, dest_task), param)
    }

    /// Message as emitted by a controller task towards the host
    pub fn from_task(msg_id: u16, src_task: u16, conn_idx: u16, param: Vec<u8>) -> Self {
        Self {
            msg_id,
            dest_id: TASK_ID_GTL,
            src_id: task_id(conn_idx, src_task),
            param,
        }
    }

    /// Connection index of the emitting task instance
    pub fn conn_idx(&self) -> u16 {
        conn_of(self.src_id)
    }

    /// Connection index of the addressed task instance
    pub fn dest_conn_idx(&self) -> u16 {
        conn_of(self.dest_id)
    }

    /// Whether this message is a completion event whose first payload byte is
    /// an operation code
    pub fn is_completion(&self) -> bool {
        self.msg_id == GAPM_CMP_EVT || self.msg_id == GAPC_CMP_EVT
    }

    /// Operation carried by a completion event
    pub fn operation(&self) -> Option<u8> {
        if self.is_completion() {
            self.param.first().copied()
        } else {
            None
        }
    }

    /// Serialize to the little-endian wire layout
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let param_len = u16::try_from(self.param.len()).map_err(|_| WireError::PayloadTooLarge {
            msg_id: self.msg_id,
            len: self.param.len(),
        })?;

        let mut out = Vec::with_capacity(WIRE_HEADER_LEN + self.param.len());
        out.write_u16::<LittleEndian>(self.msg_id)?;
        out.write_u16::<LittleEndian>(self.dest_id)?;
        out.write_u16::<LittleEndian>(self.src_id)?;
        out.write_u16::<LittleEndian>(param_len)?;
        out.extend_from_slice(&self.param);
        Ok(out)
    }

    /// Parse a message from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < WIRE_HEADER_LEN {
            return Err(WireError::InvalidPacketFormat);
        }

        let mut cursor = Cursor::new(data);
        let msg_id = cursor.read_u16::<LittleEndian>()?;
        let dest_id = cursor.read_u16::<LittleEndian>()?;
        let src_id = cursor.read_u16::<LittleEndian>()?;
        let param_len = cursor.read_u16::<LittleEndian>()? as usize;

        let payload = &data[WIRE_HEADER_LEN..];
        if payload.len() < param_len {
            return Err(WireError::InvalidParamLength {
                msg_id,
                needed: param_len,
                actual: payload.len(),
            });
        }

        Ok(Self {
            msg_id,
            dest_id,
            src_id,
            param: payload[..param_len].to_vec(),
        })
    }
}

impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireMessage")
            .field("msg_id", &format_args!("{:#06x}", self.msg_id))
            .field("dest_id", &format_args!("{:#06x}", self.dest_id))
            .field("src_id", &format_args!("{:#06x}", self.src_id))
            .field("param", &hex::encode(&self.param))
            .finish()
    }
}

/// Local message between the manager and the transport adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterMessage {
    pub operation: u8,
    pub status: u8,
}

/// Message envelope exchanged with the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Stack(WireMessage),
    Adapter(AdapterMessage),
}

impl Envelope {
    /// Envelope opcode: category in the high byte, index in the low byte
    pub fn opcode(&self) -> u16 {
        match self {
            Envelope::Stack(_) => (CATEGORY_STACK_MSG as u16) << 8,
            Envelope::Adapter(msg) => ((CATEGORY_ADAPTER_MSG as u16) << 8) | msg.operation as u16,
        }
    }

    /// Serialize opcode followed by the category specific body
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut out = self.opcode().to_le_bytes().to_vec();
        match self {
            Envelope::Stack(msg) => out.extend_from_slice(&msg.to_bytes()?),
            Envelope::Adapter(msg) => out.push(msg.status),
        }
        Ok(out)
    }

    /// Parse an envelope from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < 2 {
            return Err(WireError::InvalidPacketFormat);
        }

        let opcode = u16::from_le_bytes([data[0], data[1]]);
        let category = (opcode >> 8) as u8;
        let index = (opcode & 0xFF) as u8;

        match category {
            CATEGORY_STACK_MSG => Ok(Envelope::Stack(WireMessage::parse(&data[2..])?)),
            CATEGORY_ADAPTER_MSG => {
                let status = *data.get(2).ok_or(WireError::InvalidPacketFormat)?;
                Ok(Envelope::Adapter(AdapterMessage {
                    operation: index,
                    status,
                }))
            }
            other => Err(WireError::UnknownCategory(other)),
        }
    }
}

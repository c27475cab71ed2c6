use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom::number::complete::be_u32;
use nom::IResult;
use nom_derive::*;
use thiserror::Error;

pub mod attr;
pub use attr::*;

pub mod open;
pub use open::*;

pub mod update;
pub use update::*;

pub mod notification;
pub use notification::*;

pub const BGP_PACKET_LEN: usize = 4096;
pub const BGP_HEADER_LEN: u16 = 19;
pub const BGP_PORT: u16 = 179;

pub const BGP_MARKER: [u8; 16] = [0xffu8; 16];

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, NomBE)]
pub enum BgpType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
    Max = 5,
}

#[derive(Debug, Clone, PartialEq, NomBE)]
pub struct BgpHeader {
    pub marker: [u8; 16],
    pub length: u16,
    pub typ: BgpType,
}

impl BgpHeader {
    pub fn new(typ: BgpType, length: u16) -> Self {
        Self {
            marker: BGP_MARKER,
            length,
            typ,
        }
    }
}

impl From<BgpHeader> for BytesMut {
    fn from(header: BgpHeader) -> Self {
        let mut buf = BytesMut::new();
        buf.put(&header.marker[..]);
        buf.put_u16(header.length);
        buf.put_u8(header.typ as u8);
        buf
    }
}

#[derive(Debug)]
pub enum BgpPacket {
    Open(Box<OpenPacket>),
    Keepalive(BgpHeader),
    Notification(NotificationPacket),
    Update(Box<UpdatePacket>),
}

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("connection not synchronized")]
    NotSynced,
    #[error("bad message length: {0}")]
    BadMessageLength(u16),
    #[error("bad message type: {0}")]
    BadMessageType(u8),
    #[error("incomplete packet: need {needed} more bytes")]
    Incomplete { needed: usize },
    #[error("parse error: {0}")]
    Parse(String),
}

impl PacketError {
    /// Errors in the fixed 19 byte header. These warrant NOTIFICATION(1,x)
    /// before the session is torn down; body errors do not.
    pub fn is_header_error(&self) -> bool {
        matches!(
            self,
            PacketError::NotSynced
                | PacketError::BadMessageLength(_)
                | PacketError::BadMessageType(_)
        )
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for PacketError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(needed) => {
                let needed = match needed {
                    nom::Needed::Unknown => 0,
                    nom::Needed::Size(size) => size.get(),
                };
                PacketError::Incomplete { needed }
            }
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                PacketError::Parse(format!("{:?}", e.code))
            }
        }
    }
}

pub trait ParseBe<T> {
    fn parse_be(input: &[u8]) -> IResult<&[u8], T>;
}

impl ParseBe<Ipv4Addr> for Ipv4Addr {
    fn parse_be(input: &[u8]) -> IResult<&[u8], Self> {
        if input.len() < 4 {
            return Err(nom::Err::Incomplete(nom::Needed::new(4)));
        }
        let (input, addr) = be_u32(input)?;
        Ok((input, Self::from(addr)))
    }
}

pub fn nlri_psize(plen: u8) -> usize {
    plen.div_ceil(8) as usize
}

pub fn peek_bgp_length(input: &[u8]) -> usize {
    if let Some(len) = input.get(16..18) {
        u16::from_be_bytes(len.try_into().unwrap()) as usize
    } else {
        0
    }
}

/// Parse one complete BGP message. The header is validated first so callers
/// can distinguish framing errors from body errors.
pub fn parse_bgp_packet(input: &[u8]) -> Result<BgpPacket, PacketError> {
    if input.len() < BGP_HEADER_LEN as usize {
        return Err(PacketError::Incomplete {
            needed: BGP_HEADER_LEN as usize - input.len(),
        });
    }
    if input[0..16] != BGP_MARKER {
        return Err(PacketError::NotSynced);
    }
    let length = peek_bgp_length(input);
    if length < BGP_HEADER_LEN as usize || length > BGP_PACKET_LEN {
        return Err(PacketError::BadMessageLength(length as u16));
    }
    if input.len() < length {
        return Err(PacketError::Incomplete {
            needed: length - input.len(),
        });
    }
    let input = &input[..length];
    match input[18] {
        1 => {
            let (_, packet) = OpenPacket::parse_packet(input)?;
            Ok(BgpPacket::Open(Box::new(packet)))
        }
        2 => {
            let (_, packet) = UpdatePacket::parse_packet(input)?;
            Ok(BgpPacket::Update(Box::new(packet)))
        }
        3 => {
            let (_, packet) = NotificationPacket::parse_packet(input)?;
            Ok(BgpPacket::Notification(packet))
        }
        4 => {
            let (_, header) = BgpHeader::parse_be(input)?;
            Ok(BgpPacket::Keepalive(header))
        }
        typ => Err(PacketError::BadMessageType(typ)),
    }
}

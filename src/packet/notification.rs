use std::fmt;

use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;
use nom_derive::*;

use super::{BgpHeader, BgpType, BGP_HEADER_LEN};

#[derive(Debug, PartialEq)]
pub struct NotificationPacket {
    pub header: BgpHeader,
    pub code: NotifyCode,
    pub sub_code: u8,
    pub data: Vec<u8>,
}

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum NotifyCode {
    MsgHeaderError = 1,
    OpenMsgError = 2,
    UpdateMsgError = 3,
    HoldTimerExpired = 4,
    FsmError = 5,
    Cease = 6,
    Unknown(u8),
}

/// Message header error sub code for a desynchronized marker.
pub const HEADER_NOT_SYNCED: u8 = 1;
/// FSM error sub code used for any message unexpected in the current state.
pub const FSM_UNEXPECTED_MESSAGE: u8 = 1;

impl From<NotifyCode> for u8 {
    fn from(code: NotifyCode) -> Self {
        use NotifyCode::*;
        match code {
            MsgHeaderError => 1,
            OpenMsgError => 2,
            UpdateMsgError => 3,
            HoldTimerExpired => 4,
            FsmError => 5,
            Cease => 6,
            Unknown(v) => v,
        }
    }
}

impl From<u8> for NotifyCode {
    fn from(code: u8) -> Self {
        use NotifyCode::*;
        match code {
            1 => MsgHeaderError,
            2 => OpenMsgError,
            3 => UpdateMsgError,
            4 => HoldTimerExpired,
            5 => FsmError,
            6 => Cease,
            v => Unknown(v),
        }
    }
}

impl fmt::Display for NotifyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use NotifyCode::*;
        match self {
            MsgHeaderError => write!(f, "Message Header Error"),
            OpenMsgError => write!(f, "OPEN Message Error"),
            UpdateMsgError => write!(f, "UPDATE Message Error"),
            HoldTimerExpired => write!(f, "Hold Timer Expired"),
            FsmError => write!(f, "Finite State Machine Error"),
            Cease => write!(f, "Cease"),
            Unknown(v) => write!(f, "Unknown {}", v),
        }
    }
}

impl fmt::Display for NotificationPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.code, u8::from(self.code), self.sub_code)
    }
}

impl NotificationPacket {
    pub fn new(code: NotifyCode, sub_code: u8, data: Vec<u8>) -> Self {
        Self {
            header: BgpHeader::new(BgpType::Notification, BGP_HEADER_LEN),
            code,
            sub_code,
            data,
        }
    }

    pub fn parse_packet(input: &[u8]) -> IResult<&[u8], NotificationPacket> {
        let (input, header) = BgpHeader::parse_be(input)?;
        let (input, code) = be_u8(input)?;
        let (input, sub_code) = be_u8(input)?;
        let len = header.length.saturating_sub(BGP_HEADER_LEN + 2);
        let (input, data) = take(len as usize)(input)?;
        let packet = NotificationPacket {
            header,
            code: code.into(),
            sub_code,
            data: data.to_vec(),
        };
        Ok((input, packet))
    }
}

impl From<NotificationPacket> for BytesMut {
    fn from(notification: NotificationPacket) -> Self {
        let mut buf = BytesMut::new();
        let header: BytesMut = notification.header.into();
        buf.put(&header[..]);
        buf.put_u8(notification.code.into());
        buf.put_u8(notification.sub_code);
        buf.put(&notification.data[..]);

        const LENGTH_POS: std::ops::Range<usize> = 16..18;
        let length: u16 = buf.len() as u16;
        buf[LENGTH_POS].copy_from_slice(&length.to_be_bytes());

        buf
    }
}

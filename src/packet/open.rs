use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::IResult;
use nom_derive::*;

use super::{BgpHeader, BgpType, BGP_HEADER_LEN};

pub const BGP_VERSION: u8 = 4;

/// OPEN body is 10 fixed bytes. Optional parameters are never emitted and
/// are skipped unparsed on receipt.
#[derive(Debug, PartialEq, NomBE)]
pub struct OpenPacket {
    pub header: BgpHeader,
    pub version: u8,
    pub asn: u16,
    pub hold_time: u16,
    pub bgp_id: [u8; 4],
    pub opt_param_len: u8,
}

impl OpenPacket {
    pub fn new(asn: u16, hold_time: u16, router_id: &Ipv4Addr) -> OpenPacket {
        OpenPacket {
            header: BgpHeader::new(BgpType::Open, BGP_HEADER_LEN + 10),
            version: BGP_VERSION,
            asn,
            hold_time,
            bgp_id: router_id.octets(),
            opt_param_len: 0,
        }
    }

    pub fn router_id(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.bgp_id)
    }

    pub fn parse_packet(input: &[u8]) -> IResult<&[u8], OpenPacket> {
        let (input, packet) = OpenPacket::parse_be(input)?;
        let (input, _opt_params) = take(packet.opt_param_len as usize)(input)?;
        Ok((input, packet))
    }
}

impl From<OpenPacket> for BytesMut {
    fn from(open: OpenPacket) -> Self {
        let mut buf = BytesMut::new();
        let header: BytesMut = open.header.into();
        buf.put(&header[..]);
        buf.put_u8(open.version);
        buf.put_u16(open.asn);
        buf.put_u16(open.hold_time);
        buf.put(&open.bgp_id[..]);
        buf.put_u8(open.opt_param_len);

        const LENGTH_POS: std::ops::Range<usize> = 16..18;
        let length: u16 = buf.len() as u16;
        buf[LENGTH_POS].copy_from_slice(&length.to_be_bytes());

        buf
    }
}

use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use ipnet::Ipv4Net;
use nom::bytes::complete::take;
use nom::combinator::complete;
use nom::error::{make_error, ErrorKind};
use nom::multi::many0;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use nom_derive::*;

use super::{
    nlri_psize, parse_bgp_update_attrs, BgpAttr, BgpHeader, BgpType, BGP_HEADER_LEN,
};

#[derive(Debug, NomBE)]
pub struct UpdatePacket {
    pub header: BgpHeader,
    #[nom(Ignore)]
    pub bgp_attr: Option<BgpAttr>,
    #[nom(Ignore)]
    pub updates: Vec<Ipv4Net>,
    #[nom(Ignore)]
    pub withdraws: Vec<Ipv4Net>,
}

impl Default for UpdatePacket {
    fn default() -> Self {
        Self {
            header: BgpHeader::new(BgpType::Update, BGP_HEADER_LEN),
            bgp_attr: None,
            updates: Vec::new(),
            withdraws: Vec::new(),
        }
    }
}

impl UpdatePacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_packet(input: &[u8]) -> IResult<&[u8], UpdatePacket> {
        let (input, mut packet) = UpdatePacket::parse_be(input)?;
        let (input, withdraw_len) = be_u16(input)?;
        let (input, mut withdraws) = parse_bgp_nlri_ipv4(input, withdraw_len as usize)?;
        packet.withdraws.append(&mut withdraws);
        let (input, attr_len) = be_u16(input)?;
        let (input, bgp_attr) = parse_bgp_update_attrs(input, attr_len)?;
        packet.bgp_attr = Some(bgp_attr);
        let nlri_len = (packet.header.length as usize)
            .checked_sub(BGP_HEADER_LEN as usize + 2 + withdraw_len as usize + 2 + attr_len as usize)
            .ok_or_else(|| nom::Err::Error(make_error(input, ErrorKind::LengthValue)))?;
        let (input, mut updates) = parse_bgp_nlri_ipv4(input, nlri_len)?;
        packet.updates.append(&mut updates);
        Ok((input, packet))
    }
}

impl From<UpdatePacket> for BytesMut {
    fn from(update: UpdatePacket) -> Self {
        let mut buf = BytesMut::new();
        let header: BytesMut = update.header.into();
        buf.put(&header[..]);

        // Withdrawn routes length, backfilled.
        let withdraw_len_pos = buf.len();
        buf.put_u16(0u16);
        let withdraw_pos: std::ops::Range<usize> = withdraw_len_pos..withdraw_len_pos + 2;
        nlri_emit(&update.withdraws, &mut buf);
        let withdraw_len: u16 = (buf.len() - withdraw_len_pos - 2) as u16;
        buf[withdraw_pos].copy_from_slice(&withdraw_len.to_be_bytes());

        // Attributes length, backfilled.
        let attr_len_pos = buf.len();
        buf.put_u16(0u16);
        let attr_pos: std::ops::Range<usize> = attr_len_pos..attr_len_pos + 2;
        if let Some(bgp_attr) = update.bgp_attr {
            bgp_attr.attr_emit(&mut buf);
        }
        let attr_len: u16 = (buf.len() - attr_len_pos - 2) as u16;
        buf[attr_pos].copy_from_slice(&attr_len.to_be_bytes());

        // NLRI runs to the end of the message.
        nlri_emit(&update.updates, &mut buf);

        const LENGTH_POS: std::ops::Range<usize> = 16..18;
        let length: u16 = buf.len() as u16;
        buf[LENGTH_POS].copy_from_slice(&length.to_be_bytes());

        buf
    }
}

/// Emit prefixes as `u8 len` followed by ceil(len/8) high order bytes.
pub fn nlri_emit(prefixes: &[Ipv4Net], buf: &mut BytesMut) {
    for prefix in prefixes.iter() {
        buf.put_u8(prefix.prefix_len());
        let psize = nlri_psize(prefix.prefix_len());
        buf.put(&prefix.addr().octets()[0..psize]);
    }
}

fn parse_nlri_prefix(input: &[u8]) -> IResult<&[u8], Ipv4Net> {
    let (input, plen) = be_u8(input)?;
    if plen > 32 {
        return Err(nom::Err::Error(make_error(input, ErrorKind::Verify)));
    }
    let psize = nlri_psize(plen);
    if input.len() < psize {
        return Err(nom::Err::Error(make_error(input, ErrorKind::Eof)));
    }
    let mut paddr = [0u8; 4];
    paddr[..psize].copy_from_slice(&input[..psize]);
    let (input, _) = take(psize)(input)?;
    let prefix = Ipv4Net::new(Ipv4Addr::from(paddr), plen)
        .map_err(|_| nom::Err::Error(make_error(input, ErrorKind::Verify)))?;
    Ok((input, prefix))
}

pub fn parse_bgp_nlri_ipv4(input: &[u8], length: usize) -> IResult<&[u8], Vec<Ipv4Net>> {
    if input.len() < length {
        return Err(nom::Err::Incomplete(nom::Needed::new(length - input.len())));
    }
    let (nlri, input) = input.split_at(length);
    let (_, prefixes) = many0(complete(parse_nlri_prefix))(nlri)?;
    Ok((input, prefixes))
}

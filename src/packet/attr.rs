use std::fmt;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::combinator::complete;
use nom::multi::many0;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::ParseBe;

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AttrType {
    Origin = 1,
    AsPath = 2,
    NextHop = 3,
    Unknown(u8),
}

impl From<u8> for AttrType {
    fn from(attr_type: u8) -> Self {
        use AttrType::*;
        match attr_type {
            1 => Origin,
            2 => AsPath,
            3 => NextHop,
            v => Unknown(v),
        }
    }
}

impl From<AttrType> for u8 {
    fn from(attr_type: AttrType) -> Self {
        use AttrType::*;
        match attr_type {
            Origin => 1,
            AsPath => 2,
            NextHop => 3,
            Unknown(v) => v,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy)]
    pub struct AttrFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXTENDED = 0x10;
    }
}

impl AttrFlags {
    pub fn is_extended(&self) -> bool {
        self.contains(AttrFlags::EXTENDED)
    }
}

/// Emit an attribute as flags/type/length followed by the value bytes.
pub trait AttrEmitter {
    fn attr_flags(&self) -> AttrFlags;

    fn attr_type(&self) -> AttrType;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, buf: &mut BytesMut);

    fn attr_emit(&self, buf: &mut BytesMut) {
        let len = self.len();
        if len > 255 {
            buf.put_u8((self.attr_flags() | AttrFlags::EXTENDED).bits());
            buf.put_u8(self.attr_type().into());
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(self.attr_flags().bits());
            buf.put_u8(self.attr_type().into());
            buf.put_u8(len as u8);
        }
        self.emit(buf);
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Igp => "IGP",
            Origin::Egp => "EGP",
            Origin::Incomplete => "INCOMPLETE",
        }
    }
}

impl From<Origin> for u8 {
    fn from(value: Origin) -> Self {
        value as u8
    }
}

impl ParseBe<Origin> for Origin {
    fn parse_be(input: &[u8]) -> IResult<&[u8], Origin> {
        let (input, val) = be_u8(input)?;
        let origin = match val {
            0 => Origin::Igp,
            1 => Origin::Egp,
            _ => Origin::Incomplete,
        };
        Ok((input, origin))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AttrEmitter for Origin {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::TRANSITIVE
    }

    fn attr_type(&self) -> AttrType {
        AttrType::Origin
    }

    fn len(&self) -> usize {
        1
    }

    fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8((*self).into());
    }
}

pub const AS_SET: u8 = 1;
pub const AS_SEQ: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsSegment {
    pub typ: u8,
    pub asn: Vec<u16>,
}

/// AS_PATH built from AS_SEQUENCE segments of 2-octet ASNs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsPath {
    pub segs: Vec<AsSegment>,
}

impl AsPath {
    pub fn from_asns(asns: Vec<u16>) -> Self {
        if asns.is_empty() {
            Self { segs: Vec::new() }
        } else {
            Self {
                segs: vec![AsSegment { typ: AS_SEQ, asn: asns }],
            }
        }
    }

    pub fn asns(&self) -> Vec<u16> {
        self.segs.iter().flat_map(|seg| seg.asn.iter().copied()).collect()
    }
}

fn parse_as_segment(input: &[u8]) -> IResult<&[u8], AsSegment> {
    let (input, typ) = be_u8(input)?;
    let (input, length) = be_u8(input)?;
    let mut asn = Vec::with_capacity(length as usize);
    let mut input = input;
    for _ in 0..length {
        let (rest, val) = be_u16(input)?;
        asn.push(val);
        input = rest;
    }
    Ok((input, AsSegment { typ, asn }))
}

impl ParseBe<AsPath> for AsPath {
    fn parse_be(input: &[u8]) -> IResult<&[u8], AsPath> {
        let (input, segs) = many0(complete(parse_as_segment))(input)?;
        Ok((input, AsPath { segs }))
    }
}

impl AttrEmitter for AsPath {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::TRANSITIVE
    }

    fn attr_type(&self) -> AttrType {
        AttrType::AsPath
    }

    fn len(&self) -> usize {
        self.segs.iter().map(|seg| 2 + 2 * seg.asn.len()).sum()
    }

    fn emit(&self, buf: &mut BytesMut) {
        for seg in self.segs.iter() {
            buf.put_u8(seg.typ);
            buf.put_u8(seg.asn.len() as u8);
            for asn in seg.asn.iter() {
                buf.put_u16(*asn);
            }
        }
    }
}

impl fmt::Display for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self
            .asns()
            .iter()
            .map(|asn| asn.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        write!(f, "{v}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NexthopAttr {
    pub nexthop: Ipv4Addr,
}

impl ParseBe<NexthopAttr> for NexthopAttr {
    fn parse_be(input: &[u8]) -> IResult<&[u8], NexthopAttr> {
        let (input, nexthop) = Ipv4Addr::parse_be(input)?;
        Ok((input, NexthopAttr { nexthop }))
    }
}

impl AttrEmitter for NexthopAttr {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::TRANSITIVE
    }

    fn attr_type(&self) -> AttrType {
        AttrType::NextHop
    }

    fn len(&self) -> usize {
        4
    }

    fn emit(&self, buf: &mut BytesMut) {
        buf.put(&self.nexthop.octets()[..]);
    }
}

/// Recognized attributes of one UPDATE.
#[derive(Debug, Clone, Default)]
pub struct BgpAttr {
    pub origin: Option<Origin>,
    pub aspath: Option<AsPath>,
    pub nexthop: Option<NexthopAttr>,
}

impl BgpAttr {
    pub fn attr_emit(&self, buf: &mut BytesMut) {
        if let Some(origin) = &self.origin {
            origin.attr_emit(buf);
        }
        if let Some(aspath) = &self.aspath {
            aspath.attr_emit(buf);
        }
        if let Some(nexthop) = &self.nexthop {
            nexthop.attr_emit(buf);
        }
    }
}

fn parse_attr_tlv(input: &[u8]) -> IResult<&[u8], (AttrFlags, u8, &[u8])> {
    let (input, flags) = be_u8(input)?;
    let flags = AttrFlags::from_bits_retain(flags);
    let (input, typ) = be_u8(input)?;
    let (input, length) = if flags.is_extended() {
        be_u16(input)?
    } else {
        let (input, length) = be_u8(input)?;
        (input, length as u16)
    };
    let (input, payload) = take(length as usize)(input)?;
    Ok((input, (flags, typ, payload)))
}

/// Walk the attribute block as a TLV stream. Recognized attributes are
/// collected; unknown types are skipped and a malformed tail ends the walk
/// without failing the whole UPDATE.
pub fn parse_bgp_update_attrs(input: &[u8], length: u16) -> IResult<&[u8], BgpAttr> {
    if input.len() < length as usize {
        return Err(nom::Err::Incomplete(nom::Needed::new(
            length as usize - input.len(),
        )));
    }
    let (attrs, input) = input.split_at(length as usize);
    let mut bgp_attr = BgpAttr::default();
    let mut remaining = attrs;
    while !remaining.is_empty() {
        let Ok((rest, (_flags, typ, payload))) = parse_attr_tlv(remaining) else {
            break;
        };
        match AttrType::from(typ) {
            AttrType::Origin => {
                if let Ok((_, origin)) = Origin::parse_be(payload) {
                    bgp_attr.origin = Some(origin);
                }
            }
            AttrType::AsPath => {
                if let Ok((_, aspath)) = AsPath::parse_be(payload) {
                    bgp_attr.aspath = Some(aspath);
                }
            }
            AttrType::NextHop => {
                if let Ok((_, nexthop)) = NexthopAttr::parse_be(payload) {
                    bgp_attr.nexthop = Some(nexthop);
                }
            }
            AttrType::Unknown(_) => {}
        }
        remaining = rest;
    }
    Ok((input, bgp_attr))
}

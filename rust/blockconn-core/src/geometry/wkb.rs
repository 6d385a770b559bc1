use std::error::Error;
use std::fmt::{Display, Formatter};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::{Coord, LineString, MultiPolygon, Polygon};

const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOLYGON: u32 = 6;
// PostGIS EWKB flag bits
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
const EWKB_Z_FLAG: u32 = 0x8000_0000;
const EWKB_M_FLAG: u32 = 0x4000_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    TooShort,
    UnsupportedByteOrder(u8),
    UnsupportedGeomType(u32),
    InvalidCounts,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::TooShort => write!(f, "input too short"),
            DecodeError::UnsupportedByteOrder(b) => write!(f, "unsupported byte order marker {b}"),
            DecodeError::UnsupportedGeomType(t) => {
                write!(f, "unsupported geometry type {t} (expected 2D Polygon=3 or MultiPolygon=6)")
            }
            DecodeError::InvalidCounts => write!(f, "invalid counts in WKB"),
        }
    }
}

impl Error for DecodeError {}

#[derive(Copy, Clone, Debug)]
enum Endian {
    Big,
    Little,
}

struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.off.checked_add(n).ok_or(DecodeError::InvalidCounts)?;
        if end > self.buf.len() {
            return Err(DecodeError::TooShort);
        }
        let s = &self.buf[self.off..end];
        self.off = end;
        Ok(s)
    }

    fn endian(&mut self) -> Result<Endian, DecodeError> {
        match self.take(1)?[0] {
            0 => Ok(Endian::Big),
            1 => Ok(Endian::Little),
            other => Err(DecodeError::UnsupportedByteOrder(other)),
        }
    }

    fn u32(&mut self, e: Endian) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(match e {
            Endian::Big => BigEndian::read_u32(b),
            Endian::Little => LittleEndian::read_u32(b),
        })
    }

    fn f64(&mut self, e: Endian) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(match e {
            Endian::Big => BigEndian::read_f64(b),
            Endian::Little => LittleEndian::read_f64(b),
        })
    }

    /// Reads a count and checks that `count * min_item_bytes` still fits in the buffer.
    fn count(&mut self, e: Endian, min_item_bytes: usize) -> Result<usize, DecodeError> {
        let n = self.u32(e)? as usize;
        let needed = n.checked_mul(min_item_bytes).ok_or(DecodeError::InvalidCounts)?;
        if self.buf.len() - self.off < needed {
            return Err(DecodeError::InvalidCounts);
        }
        Ok(n)
    }

    /// Byte order + type header. Returns the plain 2D geometry type.
    fn header(&mut self) -> Result<(Endian, u32), DecodeError> {
        let e = self.endian()?;
        let raw = self.u32(e)?;
        if raw & (EWKB_Z_FLAG | EWKB_M_FLAG) != 0 {
            return Err(DecodeError::UnsupportedGeomType(raw));
        }
        if raw & EWKB_SRID_FLAG != 0 {
            let _srid = self.u32(e)?;
        }
        let gtype = raw & 0x0FFF_FFFF;
        // ISO WKB Z/M/ZM codes (1000s) are rejected the same way
        if gtype >= 1000 {
            return Err(DecodeError::UnsupportedGeomType(gtype));
        }
        Ok((e, gtype))
    }

    fn ring(&mut self, e: Endian) -> Result<LineString<f64>, DecodeError> {
        let npoints = self.count(e, 16)?;
        let mut pts = Vec::with_capacity(npoints);
        for _ in 0..npoints {
            let x = self.f64(e)?;
            let y = self.f64(e)?;
            pts.push(Coord { x, y });
        }
        Ok(LineString::new(pts))
    }

    fn polygon_body(&mut self, e: Endian) -> Result<Option<Polygon<f64>>, DecodeError> {
        let nrings = self.count(e, 4)?;
        let mut rings = Vec::with_capacity(nrings);
        for _ in 0..nrings {
            rings.push(self.ring(e)?);
        }
        let mut it = rings.into_iter();
        match it.next() {
            Some(exterior) if !exterior.0.is_empty() => Ok(Some(Polygon::new(
                exterior,
                it.filter(|r| !r.0.is_empty()).collect(),
            ))),
            _ => Ok(None),
        }
    }
}

/// Decode a WKB/EWKB Polygon or MultiPolygon (either byte order) into a `MultiPolygon`.
/// Empty polygons are skipped, so an empty geometry decodes to an empty `MultiPolygon`.
pub fn decode_multipolygon(wkb: &[u8]) -> Result<MultiPolygon<f64>, DecodeError> {
    let mut r = Reader::new(wkb);
    let (e, gtype) = r.header()?;
    match gtype {
        WKB_POLYGON => Ok(MultiPolygon::new(r.polygon_body(e)?.into_iter().collect())),
        WKB_MULTIPOLYGON => {
            // Each member carries its own header (1 + 4 + 4 bytes minimum)
            let n = r.count(e, 9)?;
            let mut polys = Vec::with_capacity(n);
            for _ in 0..n {
                let (pe, pt) = r.header()?;
                if pt != WKB_POLYGON {
                    return Err(DecodeError::UnsupportedGeomType(pt));
                }
                if let Some(p) = r.polygon_body(pe)? {
                    polys.push(p);
                }
            }
            Ok(MultiPolygon::new(polys))
        }
        other => Err(DecodeError::UnsupportedGeomType(other)),
    }
}

// Rings are closed by `Polygon::new`, so coordinates are written as stored.
fn push_ring(out: &mut Vec<u8>, ring: &LineString<f64>) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u32(&mut buf[..4], ring.0.len() as u32);
    out.extend_from_slice(&buf[..4]);
    for c in ring.coords() {
        LittleEndian::write_f64(&mut buf, c.x);
        out.extend_from_slice(&buf);
        LittleEndian::write_f64(&mut buf, c.y);
        out.extend_from_slice(&buf);
    }
}

fn push_polygon(out: &mut Vec<u8>, poly: &Polygon<f64>) {
    let mut buf = [0u8; 4];
    out.push(1u8);
    LittleEndian::write_u32(&mut buf, WKB_POLYGON);
    out.extend_from_slice(&buf);
    LittleEndian::write_u32(&mut buf, (1 + poly.interiors().len()) as u32);
    out.extend_from_slice(&buf);
    push_ring(out, poly.exterior());
    for h in poly.interiors() {
        push_ring(out, h);
    }
}

/// Little-endian WKB Polygon.
pub fn encode_polygon(poly: &Polygon<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    push_polygon(&mut out, poly);
    out
}

/// Little-endian WKB MultiPolygon.
pub fn encode_multipolygon(mp: &MultiPolygon<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4];
    out.push(1u8);
    LittleEndian::write_u32(&mut buf, WKB_MULTIPOLYGON);
    out.extend_from_slice(&buf);
    LittleEndian::write_u32(&mut buf, mp.0.len() as u32);
    out.extend_from_slice(&buf);
    for p in &mp.0 {
        push_polygon(&mut out, p);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, side: f64) -> LineString<f64> {
        LineString::from(vec![(x0, y0), (x0 + side, y0), (x0 + side, y0 + side), (x0, y0 + side)])
    }

    #[test]
    fn polygon_roundtrip_keeps_closed_ring() {
        let poly = Polygon::new(square(0.0, 0.0, 1.0), vec![]);
        let wkb = encode_polygon(&poly);
        // 1 + 4 + 4 + 4 + 5 points * 16
        assert_eq!(wkb.len(), 13 + 5 * 16);
        let mp = decode_multipolygon(&wkb).unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0], poly);
        assert!(mp.0[0].exterior().is_closed());
    }

    #[test]
    fn multipolygon_with_hole() {
        let outer = Polygon::new(square(0.0, 0.0, 10.0), vec![square(2.0, 2.0, 2.0)]);
        let other = Polygon::new(square(20.0, 20.0, 1.0), vec![]);
        let mp = MultiPolygon::new(vec![outer, other]);
        let decoded = decode_multipolygon(&encode_multipolygon(&mp)).unwrap();
        assert_eq!(decoded, mp);
        assert_eq!(decoded.0[0].interiors().len(), 1);
    }

    #[test]
    fn big_endian_polygon() {
        let ring = Polygon::new(square(1.0, 2.0, 3.0), vec![]).exterior().clone();
        let mut wkb = vec![0u8];
        wkb.extend_from_slice(&3u32.to_be_bytes());
        wkb.extend_from_slice(&1u32.to_be_bytes());
        wkb.extend_from_slice(&(ring.0.len() as u32).to_be_bytes());
        for c in ring.coords() {
            wkb.extend_from_slice(&c.x.to_be_bytes());
            wkb.extend_from_slice(&c.y.to_be_bytes());
        }
        let mp = decode_multipolygon(&wkb).unwrap();
        assert_eq!(mp.0[0].exterior(), &ring);
    }

    #[test]
    fn ewkb_srid_is_skipped() {
        let plain = encode_polygon(&Polygon::new(square(0.0, 0.0, 1.0), vec![]));
        let mut ewkb = vec![1u8];
        ewkb.extend_from_slice(&(3u32 | EWKB_SRID_FLAG).to_le_bytes());
        ewkb.extend_from_slice(&2163u32.to_le_bytes());
        ewkb.extend_from_slice(&plain[5..]);
        assert_eq!(decode_multipolygon(&ewkb).unwrap(), decode_multipolygon(&plain).unwrap());
    }

    #[test]
    fn empty_polygon_decodes_to_empty_multipolygon() {
        let mut wkb = vec![1u8];
        wkb.extend_from_slice(&3u32.to_le_bytes());
        wkb.extend_from_slice(&0u32.to_le_bytes());
        assert!(decode_multipolygon(&wkb).unwrap().0.is_empty());
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(decode_multipolygon(&[1u8, 3, 0]), Err(DecodeError::TooShort));
        assert_eq!(decode_multipolygon(&[7u8, 3, 0, 0, 0]), Err(DecodeError::UnsupportedByteOrder(7)));
        let mut point = vec![1u8];
        point.extend_from_slice(&1u32.to_le_bytes());
        assert_eq!(decode_multipolygon(&point), Err(DecodeError::UnsupportedGeomType(1)));
        let mut huge = vec![1u8];
        huge.extend_from_slice(&3u32.to_le_bytes());
        huge.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(decode_multipolygon(&huge), Err(DecodeError::InvalidCounts));
    }
}

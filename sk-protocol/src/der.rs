//! A minimal DER reader for the X.509 fields PIV/OpenPGP slot metadata
//! needs: subject, issuer, serial number, and validity dates.
//!
//! Spec.md §1 scopes out "certificate parsing beyond what the protocol
//! requires for slot metadata" — this is that minimum, not a general X.509
//! library. It walks the `TBSCertificate` SEQUENCE by tag/length only; it
//! does not validate signatures, extensions, or chains.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DerError {
    #[error("unexpected end of DER input")]
    Truncated,
    #[error("unsupported or malformed DER structure: {0}")]
    Malformed(&'static str),
}

type Result<T> = std::result::Result<T, DerError>;

#[derive(Clone, Debug, Default)]
pub struct CertSummary {
    pub subject: String,
    pub issuer: String,
    pub serial_hex: String,
    pub not_before: String,
    pub not_after: String,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

struct Tlv<'a> {
    tag: u8,
    value: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_tlv(&mut self) -> Result<Tlv<'a>> {
        if self.pos >= self.buf.len() {
            return Err(DerError::Truncated);
        }
        let tag = self.buf[self.pos];
        self.pos += 1;
        let len = self.read_length()?;
        if self.pos + len > self.buf.len() {
            return Err(DerError::Truncated);
        }
        let value = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(Tlv { tag, value })
    }

    fn read_length(&mut self) -> Result<usize> {
        if self.pos >= self.buf.len() {
            return Err(DerError::Truncated);
        }
        let first = self.buf[self.pos];
        self.pos += 1;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let n = (first & 0x7F) as usize;
        if n == 0 || self.pos + n > self.buf.len() {
            return Err(DerError::Malformed("indefinite or truncated length"));
        }
        let mut len = 0usize;
        for i in 0..n {
            len = (len << 8) | self.buf[self.pos + i] as usize;
        }
        self.pos += n;
        Ok(len)
    }
}

/// Parse the handful of `TBSCertificate` fields slot metadata needs out of
/// a DER-encoded X.509 certificate.
pub fn summarize_certificate(der: &[u8]) -> Result<CertSummary> {
    let mut outer = Reader::new(der);
    let cert = outer.read_tlv()?; // Certificate ::= SEQUENCE
    if cert.tag != 0x30 {
        return Err(DerError::Malformed("not a SEQUENCE"));
    }

    let mut cert_fields = Reader::new(cert.value);
    let tbs = cert_fields.read_tlv()?; // tbsCertificate ::= SEQUENCE
    if tbs.tag != 0x30 {
        return Err(DerError::Malformed("tbsCertificate not a SEQUENCE"));
    }

    let mut tbs_fields = Reader::new(tbs.value);
    let mut next = tbs_fields.read_tlv()?;

    // Optional explicit [0] version tag.
    if next.tag == 0xA0 {
        next = tbs_fields.read_tlv()?;
    }

    // serialNumber ::= INTEGER
    if next.tag != 0x02 {
        return Err(DerError::Malformed("expected serialNumber INTEGER"));
    }
    let serial_hex = hex::encode(strip_leading_zero(next.value));

    let _signature_alg = tbs_fields.read_tlv()?; // AlgorithmIdentifier
    let issuer = tbs_fields.read_tlv()?; // Name
    let validity = tbs_fields.read_tlv()?; // Validity ::= SEQUENCE
    let subject = tbs_fields.read_tlv()?; // Name

    let issuer_str = summarize_name(issuer.value)?;
    let subject_str = summarize_name(subject.value)?;
    let (not_before, not_after) = summarize_validity(validity.value)?;

    Ok(CertSummary {
        subject: subject_str,
        issuer: issuer_str,
        serial_hex,
        not_before,
        not_after,
    })
}

fn strip_leading_zero(v: &[u8]) -> &[u8] {
    if v.len() > 1 && v[0] == 0x00 {
        &v[1..]
    } else {
        v
    }
}

/// `Name` is a SEQUENCE OF RelativeDistinguishedName (SET OF
/// AttributeTypeAndValue); render it as a comma-separated
/// `attr=value` string using the attribute's raw printable bytes (enough
/// for the UI to display, not a full RFC 4514 renderer).
fn summarize_name(der: &[u8]) -> Result<String> {
    let mut r = Reader::new(der);
    let mut parts = Vec::new();
    while r.pos < r.buf.len() {
        let rdn_set = r.read_tlv()?; // SET
        if rdn_set.tag != 0x31 {
            return Err(DerError::Malformed("expected RDN SET"));
        }
        let mut rdn = Reader::new(rdn_set.value);
        let atv = rdn.read_tlv()?; // SEQUENCE
        let mut atv_fields = Reader::new(atv.value);
        let oid = atv_fields.read_tlv()?; // OBJECT IDENTIFIER
        let value = atv_fields.read_tlv()?; // ANY (commonly PrintableString/UTF8String)
        let value_str = String::from_utf8_lossy(value.value);
        parts.push(format!("{}={}", short_oid_name(oid.value), value_str));
    }
    Ok(parts.join(","))
}

fn short_oid_name(oid: &[u8]) -> &'static str {
    match oid {
        [0x55, 0x04, 0x03] => "CN",
        [0x55, 0x04, 0x0A] => "O",
        [0x55, 0x04, 0x0B] => "OU",
        [0x55, 0x04, 0x06] => "C",
        [0x55, 0x04, 0x07] => "L",
        [0x55, 0x04, 0x08] => "ST",
        _ => "OID",
    }
}

/// `Validity ::= SEQUENCE { notBefore Time, notAfter Time }`, each an
/// UTCTime (`YYMMDDHHMMSSZ`) or GeneralizedTime (`YYYYMMDDHHMMSSZ`).
fn summarize_validity(der: &[u8]) -> Result<(String, String)> {
    let mut r = Reader::new(der);
    let not_before = r.read_tlv()?;
    let not_after = r.read_tlv()?;
    Ok((decode_time(&not_before)?, decode_time(&not_after)?))
}

fn decode_time(tlv: &Tlv) -> Result<String> {
    let raw = std::str::from_utf8(tlv.value).map_err(|_| DerError::Malformed("time not ASCII"))?;
    match tlv.tag {
        0x17 => {
            // UTCTime: YYMMDDHHMMSSZ, year pivot at 50 per X.509.
            if raw.len() < 13 {
                return Err(DerError::Malformed("short UTCTime"));
            }
            let yy: u32 = raw[0..2].parse().map_err(|_| DerError::Malformed("UTCTime year"))?;
            let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
            Ok(format!(
                "{:04}-{}-{}T{}:{}:{}Z",
                year,
                &raw[2..4],
                &raw[4..6],
                &raw[6..8],
                &raw[8..10],
                &raw[10..12]
            ))
        }
        0x18 => {
            // GeneralizedTime: YYYYMMDDHHMMSSZ
            if raw.len() < 15 {
                return Err(DerError::Malformed("short GeneralizedTime"));
            }
            Ok(format!(
                "{}-{}-{}T{}:{}:{}Z",
                &raw[0..4],
                &raw[4..6],
                &raw[6..8],
                &raw[8..10],
                &raw[10..12],
                &raw[12..14]
            ))
        }
        _ => Err(DerError::Malformed("unexpected Time tag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_sequence() {
        let err = summarize_certificate(&[0x02, 0x01, 0x00]).unwrap_err();
        matches!(err, DerError::Malformed(_));
    }

    #[test]
    fn decodes_utc_time() {
        let tlv = Tlv {
            tag: 0x17,
            value: b"240102030405Z",
        };
        assert_eq!(decode_time(&tlv).unwrap(), "2024-01-02T03:04:05Z");
    }
}

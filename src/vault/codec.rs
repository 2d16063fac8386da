//! Binary encoding of secret values and of the flattened secret table.
//!
//! Every integer is little-endian.  A typed value is stored inside its
//! `SecureBuffer` as:
//!
//!   Bytes         raw bytes
//!   Text          UTF-8
//!   Guid          16 bytes (RFC 4122 byte order)
//!   SymmetricKey  cascade exportable form
//!   Certificate   [derLen u32][der][hasKey u8][keyLen u32][key]   (key part only if hasKey = 1)
//!
//! The table handed to the cascade on export is:
//!
//!   [count u32] then per entry:
//!   [nameLen u32][name][kind u8][createdAt i64 unix ms][payloadLen u32][payload]
//!
//! All encoders write into `Zeroizing` buffers with the exact capacity
//! precomputed, so plaintext is never left behind by a reallocation.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::secret::{Certificate, SecretKind, SecretValue};
use crate::crypto::CascadingSymmetricKey;
use crate::errors::{Result, StrongboxError};

/// One row of a decoded secret table.
pub struct TableEntry {
    pub name: String,
    pub kind: SecretKind,
    pub created_at: DateTime<Utc>,
    pub payload: Zeroizing<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Encode a typed value into the bytes a `SecureBuffer` holds.
pub fn encode_value(value: &SecretValue) -> Result<Zeroizing<Vec<u8>>> {
    let encoded = match value {
        SecretValue::Bytes(bytes) => Zeroizing::new(bytes.to_vec()),
        SecretValue::Text(text) => Zeroizing::new(text.as_bytes().to_vec()),
        SecretValue::Guid(guid) => Zeroizing::new(guid.as_bytes().to_vec()),
        SecretValue::SymmetricKey(key) => key.to_exportable_form(),
        SecretValue::Certificate(cert) => encode_certificate(cert)?,
    };
    Ok(encoded)
}

/// Rebuild a typed value of `kind` from buffer bytes.
pub fn decode_value(kind: SecretKind, bytes: &[u8]) -> Result<SecretValue> {
    match kind {
        SecretKind::Bytes => Ok(SecretValue::Bytes(Zeroizing::new(bytes.to_vec()))),
        SecretKind::Text => decode_text(bytes).map(SecretValue::Text),
        SecretKind::Guid => Uuid::from_slice(bytes)
            .map(SecretValue::Guid)
            .map_err(|e| StrongboxError::SerializationError(format!("invalid GUID secret: {e}"))),
        SecretKind::SymmetricKey => {
            CascadingSymmetricKey::from_exportable_form(bytes).map(SecretValue::SymmetricKey)
        }
        SecretKind::Certificate => decode_certificate(bytes).map(SecretValue::Certificate),
    }
}

/// UTF-8 decode into a zeroizing string; invalid input is wiped.
pub fn decode_text(bytes: &[u8]) -> Result<Zeroizing<String>> {
    String::from_utf8(bytes.to_vec())
        .map(Zeroizing::new)
        .map_err(|e| {
            let mut bad_bytes = e.into_bytes();
            bad_bytes.zeroize();
            StrongboxError::SerializationError("secret value is not valid UTF-8".into())
        })
}

fn encode_certificate(cert: &Certificate) -> Result<Zeroizing<Vec<u8>>> {
    let key = cert.private_key_der();
    let capacity = 4 + cert.der().len() + 1 + key.map_or(0, |k| 4 + k.len());

    let mut out = Zeroizing::new(Vec::with_capacity(capacity));
    put_bytes(&mut out, cert.der())?;
    match key {
        Some(key) => {
            out.push(1);
            put_bytes(&mut out, key)?;
        }
        None => out.push(0),
    }
    Ok(out)
}

fn decode_certificate(bytes: &[u8]) -> Result<Certificate> {
    let mut reader = Reader::new(bytes, "certificate");
    let der = reader.bytes()?.to_vec();
    let private_key_der = match reader.u8()? {
        0 => None,
        1 => Some(reader.bytes()?.to_vec()),
        other => {
            return Err(StrongboxError::SerializationError(format!(
                "certificate: invalid private-key flag {other}"
            )))
        }
    };
    reader.finish()?;
    Ok(Certificate::new(der, private_key_der))
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Builds a secret table row by row into a buffer sized up front.
pub struct TableWriter {
    out: Zeroizing<Vec<u8>>,
}

impl TableWriter {
    /// Encoded size of one row.
    pub fn row_len(name: &str, payload_len: usize) -> usize {
        4 + name.len() + 1 + 8 + 4 + payload_len
    }

    /// Start a table of `count` rows whose encoded sizes sum to `rows_len`.
    pub fn new(count: usize, rows_len: usize) -> Result<Self> {
        let mut out = Zeroizing::new(Vec::with_capacity(4 + rows_len));
        put_u32(&mut out, count)?;
        Ok(Self { out })
    }

    pub fn push(
        &mut self,
        name: &str,
        kind: SecretKind,
        created_at: DateTime<Utc>,
        payload: &[u8],
    ) -> Result<()> {
        put_bytes(&mut self.out, name.as_bytes())?;
        self.out.push(kind.tag());
        self.out
            .extend_from_slice(&created_at.timestamp_millis().to_le_bytes());
        put_bytes(&mut self.out, payload)
    }

    pub fn finish(self) -> Zeroizing<Vec<u8>> {
        self.out
    }
}

pub fn decode_table(bytes: &[u8]) -> Result<Vec<TableEntry>> {
    let mut reader = Reader::new(bytes, "secret table");
    let count = reader.u32()? as usize;

    // Each row is at least 17 bytes; cap the preallocation by what the
    // input could possibly hold.
    let mut entries = Vec::with_capacity(count.min(bytes.len() / 17));
    for _ in 0..count {
        let name = std::str::from_utf8(reader.bytes()?)
            .map_err(|_| reader.malformed("secret name is not UTF-8"))?
            .to_string();
        let kind = SecretKind::from_tag(reader.u8()?)?;
        let millis = reader.i64()?;
        let created_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| reader.malformed("timestamp out of range"))?;
        let payload = Zeroizing::new(reader.bytes()?.to_vec());
        entries.push(TableEntry {
            name,
            kind,
            created_at,
            payload,
        });
    }
    reader.finish()?;
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

pub(crate) fn put_u32(out: &mut Vec<u8>, value: usize) -> Result<()> {
    let value = u32::try_from(value)
        .map_err(|_| StrongboxError::SerializationError("length exceeds u32".into()))?;
    out.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    put_u32(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked cursor over a byte slice.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8], what: &'static str) -> Self {
        Self { bytes, pos: 0, what }
    }

    pub(crate) fn malformed(&self, why: &str) -> StrongboxError {
        StrongboxError::InvalidBundleFormat(format!("{}: {why}", self.what))
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.malformed("truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    /// A `u32` length prefix followed by that many bytes.
    pub(crate) fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Fail unless every byte was consumed.
    pub(crate) fn finish(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(self.malformed("trailing bytes"));
        }
        Ok(())
    }
}

// pmarch - Performance metrics archive writer
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Volume labels
//!
//! Every archive volume starts with a label identifying the archive and
//! the role of the volume.
//!
//! # Label Format
//!
//! The label is a framed record (see [`crate::codec::frame`]) whose body is:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ Magic "PMAR" (4 bytes)              │
//! │ Format version (u32)                │
//! │ Volume (i32: -2 index, -1 meta, N)  │
//! │ Start timestamp (8 or 12 bytes)     │
//! │ Hostname (u16 len + bytes)          │
//! │ Timezone (u16 len + bytes)          │
//! │ Zoneinfo (u16 len + bytes)          │
//! │ CRC32 of all preceding body bytes   │
//! └─────────────────────────────────────┘
//! ```

use crate::codec::{frame, put_str16, put_timestamp, unframe, ByteReader};
use crate::error::{DecodeError, MisuseError, Result};
use crate::types::{LogVersion, Timestamp};

/// Magic bytes at the start of every label
pub const LABEL_MAGIC: [u8; 4] = *b"PMAR";

/// Volume number of the temporal index
pub const VOL_INDEX: i32 = -2;

/// Volume number of the metadata volume
pub const VOL_META: i32 = -1;

/// Longest hostname, timezone or zoneinfo a label can hold
pub const MAX_LABEL_FIELD: usize = u16::MAX as usize;

/// Archive label, one per volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Archive format version
    pub version: LogVersion,
    /// Volume this label heads
    pub vol: i32,
    /// Time of the first record in the archive
    pub start: Timestamp,
    /// Host the metrics came from
    pub hostname: String,
    /// Timezone of the host, e.g. `UTC+10:00`
    pub timezone: String,
    /// Olson zone name, preferred over `timezone` when present
    pub zoneinfo: Option<String>,
}

impl Label {
    /// Create a label for the metadata volume
    pub fn new(version: LogVersion, hostname: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            version,
            vol: VOL_META,
            start: Timestamp::default(),
            hostname: hostname.into(),
            timezone: timezone.into(),
            zoneinfo: None,
        }
    }

    /// Copy of this label for another volume
    pub fn for_volume(&self, vol: i32) -> Self {
        Self {
            vol,
            ..self.clone()
        }
    }

    /// Zone to present timestamps in
    pub fn zone(&self) -> &str {
        self.zoneinfo.as_deref().unwrap_or(&self.timezone)
    }

    /// Check that every string field fits its length prefix
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("hostname", self.hostname.as_str()),
            ("timezone", self.timezone.as_str()),
            ("zoneinfo", self.zoneinfo.as_deref().unwrap_or("")),
        ];
        for (field, value) in fields {
            if value.len() > MAX_LABEL_FIELD {
                return Err(MisuseError::FieldTooLong {
                    field: field.to_string(),
                    len: value.len(),
                    max: MAX_LABEL_FIELD,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Serialize the label as a framed record
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64);

        body.extend_from_slice(&LABEL_MAGIC);
        body.extend_from_slice(&(self.version as u32).to_le_bytes());
        body.extend_from_slice(&self.vol.to_le_bytes());
        put_timestamp(&mut body, self.start, self.version);
        put_str16(&mut body, &self.hostname);
        put_str16(&mut body, &self.timezone);
        put_str16(&mut body, self.zoneinfo.as_deref().unwrap_or(""));

        let checksum = crc32fast::hash(&body);
        body.extend_from_slice(&checksum.to_le_bytes());

        frame(&body)
    }

    /// Deserialize a label from the start of a volume.
    ///
    /// Returns the label and the number of bytes it occupies.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let (body, consumed) = unframe(data, 0)?;
        if body.len() < 4 + 4 {
            return Err(DecodeError::BufferTooShort {
                needed: 8,
                available: body.len(),
            }
            .into());
        }

        if body[0..4] != LABEL_MAGIC {
            return Err(DecodeError::BadMagic.into());
        }

        // Verify checksum
        let (covered, stored) = body.split_at(body.len() - 4);
        let stored_checksum = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let computed_checksum = crc32fast::hash(covered);
        if stored_checksum != computed_checksum {
            return Err(DecodeError::InvalidChecksum {
                expected: stored_checksum,
                actual: computed_checksum,
            }
            .into());
        }

        let mut r = ByteReader::new(covered, 8);
        r.take(4)?;
        let raw_version = r.u32()?;
        let version =
            LogVersion::from_u32(raw_version).ok_or(DecodeError::UnsupportedVersion(raw_version))?;
        let vol = r.i32()?;
        let start = r.timestamp(version)?;
        let hostname = r.str16()?;
        let timezone = r.str16()?;
        let zoneinfo = r.str16()?;

        Ok((
            Self {
                version,
                vol,
                start,
                hostname,
                timezone,
                zoneinfo: if zoneinfo.is_empty() {
                    None
                } else {
                    Some(zoneinfo)
                },
            },
            consumed,
        ))
    }
}

/// Timezone string for the local host, e.g. `UTC+10:00`
pub fn local_timezone() -> String {
    let offset = chrono::Local::now().offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.abs();
    format!("UTC{}{:02}:{:02}", sign, offset / 3600, (offset % 3600) / 60)
}

/// Olson zone name from `TZ`, if one is set
pub fn local_zoneinfo() -> Option<String> {
    std::env::var("TZ")
        .ok()
        .map(|tz| tz.trim_start_matches(':').to_string())
        .filter(|tz| !tz.is_empty())
}

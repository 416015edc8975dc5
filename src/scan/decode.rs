use tracing::warn;

use crate::scan::layout::BufferLayout;

/// A decoded sample for one named channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReadingSample {
    pub value: i64,
    pub scale: f64,
    pub present: bool,
}

impl ReadingSample {
    fn absent() -> Self {
        Self {
            value: 0,
            scale: 1.0,
            present: false,
        }
    }
}

/// Pick the most recent complete record out of a raw chunk read.
///
/// A partial trailing record, or a chunk shorter than one record, yields
/// `None` ("no new data"), not an error.
pub fn latest_record(buf: &[u8], record_size: usize) -> Option<&[u8]> {
    if record_size == 0 {
        return None;
    }
    let complete = buf.len() / record_size;
    if complete == 0 {
        return None;
    }
    let start = (complete - 1) * record_size;
    Some(&buf[start..start + record_size])
}

fn sign_extend(raw: u64, bits_used: u8, storage_bytes: u8) -> i64 {
    match storage_bytes {
        1 => {
            let sh = u32::from(8 - bits_used);
            (((raw as u8) << sh) as i8 >> sh) as i64
        }
        2 => {
            let sh = u32::from(16 - u16::from(bits_used));
            (((raw as u16) << sh) as i16 >> sh) as i64
        }
        4 => {
            let sh = 32 - u32::from(bits_used);
            (((raw as u32) << sh) as i32 >> sh) as i64
        }
        _ => {
            let sh = 64 - u32::from(bits_used);
            ((raw << sh) as i64) >> sh
        }
    }
}

/// Extract the integer value of the channel `name` from one scan record.
///
/// Handles all four storage widths with byte swapping, right shift, masking
/// and sign extension from `bits_used` bits. A channel missing from the
/// layout comes back with `present == false`.
pub fn decode(record: &[u8], layout: &BufferLayout, name: &str) -> ReadingSample {
    let Some(ch) = layout.channel(name) else {
        warn!("scan channel '{}' could not be found", name);
        return ReadingSample::absent();
    };

    let start = ch.location as usize;
    let Some(bytes) = record.get(start..start + ch.storage_bytes as usize) else {
        warn!(
            "scan record too short for channel '{}' ({} bytes at offset {})",
            name, ch.storage_bytes, start
        );
        return ReadingSample::absent();
    };

    let raw: u64 = match ch.storage_bytes {
        1 => u64::from(bytes[0]),
        2 => {
            let b = [bytes[0], bytes[1]];
            u64::from(if ch.big_endian {
                u16::from_be_bytes(b)
            } else {
                u16::from_le_bytes(b)
            })
        }
        4 => {
            let b = [bytes[0], bytes[1], bytes[2], bytes[3]];
            u64::from(if ch.big_endian {
                u32::from_be_bytes(b)
            } else {
                u32::from_le_bytes(b)
            })
        }
        8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(bytes);
            if ch.big_endian {
                u64::from_be_bytes(b)
            } else {
                u64::from_le_bytes(b)
            }
        }
        other => {
            warn!("processing {}-byte channels is not supported", other);
            return ReadingSample::absent();
        }
    };

    let masked = (raw >> ch.shift) & ch.mask;
    let value = if ch.is_signed {
        sign_extend(masked, ch.bits_used, ch.storage_bytes)
    } else {
        masked as i64
    };
    let value = (value as f64 + ch.offset) as i64;

    ReadingSample {
        value,
        scale: ch.scale,
        present: true,
    }
}

use crate::errors::{SensorError, SensorResult};
use crate::scan::descriptor::ChannelDescriptor;

/// The packed layout of one scan record: every enabled channel with its byte
/// offset assigned, plus the total record size.
///
/// Mirrors the packing rules the kernel uses when it emits interleaved scan
/// records: each field starts at a multiple of its own storage size, with no
/// gaps beyond that alignment padding.
#[derive(Clone, Debug)]
pub struct BufferLayout {
    channels: Vec<ChannelDescriptor>,
    record_size: u32,
}

impl BufferLayout {
    /// Assign byte locations to `channels` and compute the record size.
    ///
    /// Channels are laid out in ascending kernel index order; callers may
    /// pass them unsorted.
    pub fn plan(mut channels: Vec<ChannelDescriptor>) -> SensorResult<Self> {
        channels.sort_by_key(|c| c.index);

        let mut cursor: u32 = 0;
        for ch in &mut channels {
            let width = u32::from(ch.storage_bytes);
            if width == 0 {
                return Err(SensorError::Descriptor {
                    channel: ch.name.clone(),
                    reason: "zero storage width".to_string(),
                });
            }
            if cursor % width != 0 {
                cursor = cursor - cursor % width + width;
            }
            ch.location = cursor;
            cursor += width;
        }

        Ok(Self {
            channels,
            record_size: cursor,
        })
    }

    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelDescriptor> {
        self.channels.iter().find(|c| c.name == name)
    }
}

//! Buffered scan-record handling: parsing the kernel's self-describing
//! channel descriptors, laying channels out into a packed record, and
//! decoding raw records into integer samples.

pub mod decode;
pub mod descriptor;
pub mod layout;

pub use decode::{decode, latest_record, ReadingSample};
pub use descriptor::{enabled_channels, ChannelDescriptor};
pub use layout::BufferLayout;

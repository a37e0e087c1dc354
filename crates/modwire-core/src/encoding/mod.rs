//! Big-endian cursor types shared by the PDU and frame codecs.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

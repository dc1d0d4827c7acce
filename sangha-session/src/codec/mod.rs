mod image_chunker;
mod image_reassembler;

pub use image_chunker::*;
pub use image_reassembler::*;

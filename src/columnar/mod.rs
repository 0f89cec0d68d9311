//! Columnar codecs and the fixed column schemas built on top of them.

pub(crate) mod column;
pub(crate) mod encoding;
pub(crate) mod value;

pub use encoding::DecodeError;

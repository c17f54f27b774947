pub mod cipher;
pub mod envelope;

pub use envelope::{DATA_KEY_LEN, Envelope, EnvelopeCodec};

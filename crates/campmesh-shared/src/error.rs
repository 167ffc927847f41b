use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame encoding failed: {0}")]
    Encode(String),

    #[error("Frame decoding failed: {0}")]
    Decode(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug)]
#[error("Unknown role: {0}")]
pub struct ParseRoleError(pub String);

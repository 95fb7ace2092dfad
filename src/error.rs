use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    /// The lease pool has no free address left.
    #[error("no available addresses in {network}")]
    ResourceExhausted { network: String },

    /// Every port of the NAT range is mapped.
    #[error("no free NAT ports in {min}-{max}")]
    PortExhausted { min: u16, max: u16 },

    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("invalid port range {min}-{max}: need 1 <= min < max <= 65535")]
    InvalidPortRange { min: u16, max: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;

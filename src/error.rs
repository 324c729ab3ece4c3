use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelectorError {
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("DNS lookup for {domain} failed: {source}")]
    Dns {
        domain: String,
        source: hickory_resolver::error::ResolveError,
    },

    #[error("DNS lookup for {0} timed out")]
    DnsTimeout(String),

    #[error("invalid status code: {status}{detail}")]
    InvalidStatus { status: u16, detail: String },

    #[error("all pings failed")]
    AllPingsFailed,

    #[error("invalid CIDR '{line}': {reason}")]
    InvalidCidr { line: String, reason: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0} is empty or contains no usable entries")]
    EmptyInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SelectorError>;

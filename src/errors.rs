use thiserror::Error;

/// Errors raised while discovering, opening or reading a sensor device.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel '{channel}' has an unusable scan type: {reason}")]
    Descriptor { channel: String, reason: String },

    #[error("device '{device}' exposes no usable scan channels")]
    NoChannels { device: String },

    #[error("device '{device}' setup failed: {reason}")]
    Setup { device: String, reason: String },

    #[error("no data-ready trigger found for device '{device}'")]
    MissingTrigger { device: String },

    #[error("invalid mount matrix '{raw}': {reason}")]
    MountMatrix { raw: String, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    FormatError(#[from] toml::de::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type aliases for convenience
pub type SensorResult<T> = Result<T, SensorError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors decoding or encoding the cost/route matrix wire formats and the
/// rmp-serde blobs (roster, debug dump).
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unknown {kind} version: {version}")]
    UnknownVersion { kind: &'static str, version: u32 },

    #[error("truncated buffer while reading {field}")]
    Truncated { field: &'static str },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<rmp_serde::encode::Error> for FormatError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        FormatError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for FormatError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        FormatError::Deserialization(e.to_string())
    }
}

/// Roster misconfiguration. Always fatal for the tick that sees it.
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("relay id collision {id:016x}: {first} and {second}")]
    IdCollision {
        id: u64,
        first: String,
        second: String,
    },

    #[error("invalid relay name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
}

/// Reasons an inbound relay update is discarded. Never fatal, never retried.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unknown relay: {address}")]
    UnknownRelay { address: String },

    #[error("stale update: {age_secs}s old")]
    StaleUpdate { age_secs: u64 },

    #[error("malformed samples: num_samples={num_samples} but only {available} present")]
    MalformedSamples { num_samples: usize, available: usize },
}

/// Shared store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected write: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Why a driver tick was abandoned. The previous snapshot keeps being served.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("roster error: {0}")]
    Roster(#[from] RosterError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no published snapshot under {key}")]
    MissingSnapshot { key: String },

    #[error("optimizer task failed: {0}")]
    Join(String),

    #[error("driver stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_version() {
        let err = FormatError::UnknownVersion {
            kind: "cost matrix",
            version: 99,
        };
        assert_eq!(err.to_string(), "unknown cost matrix version: 99");
    }

    #[test]
    fn display_truncated() {
        let err = FormatError::Truncated { field: "costs" };
        assert_eq!(err.to_string(), "truncated buffer while reading costs");
    }

    #[test]
    fn display_id_collision() {
        let err = RosterError::IdCollision {
            id: 0xab,
            first: "10.0.0.1:40000".into(),
            second: "10.0.0.2:40000".into(),
        };
        assert_eq!(
            err.to_string(),
            "relay id collision 00000000000000ab: 10.0.0.1:40000 and 10.0.0.2:40000"
        );
    }

    #[test]
    fn display_malformed_samples() {
        let err = IngestError::MalformedSamples {
            num_samples: 8,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "malformed samples: num_samples=8 but only 3 present"
        );
    }

    #[test]
    fn driver_error_wraps_store() {
        let err: DriverError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(
            err.to_string(),
            "store error: store unavailable: connection refused"
        );
    }

    #[test]
    fn rmp_decode_error_maps_to_deserialization() {
        let res: Result<Vec<String>, _> = rmp_serde::from_slice(&[0xc1]);
        let err: FormatError = res.unwrap_err().into();
        assert!(matches!(err, FormatError::Deserialization(_)));
    }
}

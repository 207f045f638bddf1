use std::time::Duration;

use crate::agent::AgentId;

#[derive(Debug, thiserror::Error)]
pub enum BuildsenseError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Failure of one external reasoning call. Always absorbed inside the agent
/// and turned into a fallback proposal.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ProviderError {
    #[error("no reasoning provider configured")]
    NotConfigured,

    #[error("provider call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("provider {provider} transport failure: {message}")]
    Transport { provider: String, message: String },

    #[error("malformed provider response: {reason}")]
    MalformedResponse { reason: String },
}

impl ProviderError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("decision sink unavailable: {0}")]
    Unavailable(String),

    #[error("decision sink did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("failed to encode decision: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("device command sink rejected {device_id}: {reason}")]
    Rejected { device_id: String, reason: String },

    #[error("device command sink unavailable: {0}")]
    Unavailable(String),

    #[error("device command sink did not answer within {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("agent {agent_id} has invalid settings: {reason}")]
    InvalidAgent { agent_id: AgentId, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_format_for_logs() {
        let err = ProviderError::Timeout {
            elapsed: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "provider call timed out after 3s");

        let err = ProviderError::malformed("missing field `confidence`");
        assert_eq!(
            err.to_string(),
            "malformed provider response: missing field `confidence`"
        );
    }

    #[test]
    fn invalid_agent_wraps_into_umbrella_error() {
        let err: BuildsenseError = ConfigError::InvalidAgent {
            agent_id: "comfort".to_string(),
            reason: "weight 1.4 outside [0,1]".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "config error: agent comfort has invalid settings: weight 1.4 outside [0,1]"
        );
    }
}

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
    #[display("environment variable {name} is not set")]
    MissingEnv { name: String },
}

#[derive(Debug, Display, Error)]
pub enum SourceError {
    #[display("failed to connect to {feed}")]
    Connection { feed: String },
    #[display("request to {feed} failed")]
    Request { feed: String },
    #[display("{feed} responded with HTTP {status}")]
    Status { feed: String, status: u16 },
    #[display("failed to parse response from {feed}")]
    ResponseParse { feed: String },
}

impl SourceError {
    /// Transport failures abandon the rest of a sweep; everything else only
    /// skips the quantity being checked.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("failed to deliver message via {notifier}")]
    Delivery { notifier: String },
    #[display("{notifier} rejected message with HTTP {status}")]
    Rejected { notifier: String, status: u16 },
}

#[derive(Debug, Display, Error)]
pub enum DriverError {
    #[display("{driver} event channel closed unexpectedly")]
    ChannelClosed { driver: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_transport() {
        let feed = "binance".to_string();
        assert!(SourceError::Connection { feed: feed.clone() }.is_transport());
        assert!(!SourceError::Request { feed: feed.clone() }.is_transport());
        assert!(
            !SourceError::Status {
                feed: feed.clone(),
                status: 502
            }
            .is_transport()
        );
        assert!(!SourceError::ResponseParse { feed }.is_transport());
    }

    #[test]
    fn status_error_display_includes_code() {
        let err = SourceError::Status {
            feed: "alcor".into(),
            status: 503,
        };
        assert_eq!(err.to_string(), "alcor responded with HTTP 503");
    }
}

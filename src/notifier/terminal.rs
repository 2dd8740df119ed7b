use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::notifier::Notifier;

/// Writes notifications to the log instead of a chat.
pub struct TerminalNotifier {
    channel: String,
}

impl TerminalNotifier {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

impl Notifier for TerminalNotifier {
    fn name(&self) -> &str {
        "terminal"
    }

    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            tracing::warn!(channel = %self.channel, "ALERT:\n{text}");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_notifier_always_succeeds() {
        let notifier = TerminalNotifier::new("poller");
        assert!(notifier.send("1 TLM = 0.12345 WAX").await.is_ok());
    }
}

pub mod telegram;
pub mod terminal;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;

/// Sink for chat notifications.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), Report<NotifyError>>>;
}

/// Fire-and-forget delivery: failures are logged and otherwise ignored.
pub async fn deliver(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        tracing::warn!(notifier = notifier.name(), error = ?e, "notification not delivered");
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every message instead of delivering it.
    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        messages: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                messages: Arc::default(),
                fail: true,
            }
        }

        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
            Box::pin(async move {
                self.messages.lock().unwrap().push(text.to_owned());
                if self.fail {
                    return Err(Report::new(NotifyError::Delivery {
                        notifier: "recording".into(),
                    }));
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn deliver_swallows_failures() {
        let notifier = RecordingNotifier::failing();
        deliver(&notifier, "hello").await;
        assert_eq!(notifier.messages(), ["hello"]);
    }
}

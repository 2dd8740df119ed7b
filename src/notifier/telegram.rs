use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::NotifyError;
use crate::notifier::Notifier;

const NOTIFIER_NAME: &str = "telegram";

/// Delivers messages through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(
        api_url: &str,
        token: &str,
        chat_id: String,
        timeout: Duration,
    ) -> Result<Self, Report<NotifyError>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(NotifyError::Delivery {
                notifier: NOTIFIER_NAME.into(),
            })?;

        Ok(Self {
            client,
            endpoint: send_message_url(api_url, token),
            chat_id,
        })
    }
}

fn send_message_url(api_url: &str, token: &str) -> String {
    format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), token)
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        NOTIFIER_NAME
    }

    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            let body = SendMessage {
                chat_id: &self.chat_id,
                text,
            };

            // The endpoint embeds the bot token; keep it out of error reports.
            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| e.without_url())
                .change_context(NotifyError::Delivery {
                    notifier: NOTIFIER_NAME.into(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(Report::new(NotifyError::Rejected {
                    notifier: NOTIFIER_NAME.into(),
                    status: status.as_u16(),
                }));
            }

            tracing::debug!(chat_id = %self.chat_id, "telegram message delivered");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_url_tolerates_trailing_slash() {
        assert_eq!(
            send_message_url("https://api.telegram.org/", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert_eq!(
            send_message_url("https://api.telegram.org", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn payload_serializes_chat_id_and_text() {
        let body = SendMessage {
            chat_id: "-100200",
            text: "BOT STARTED",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["chat_id"], "-100200");
        assert_eq!(json["text"], "BOT STARTED");
    }

    /// Integration test: requires network access and credentials in
    /// `TELEGRAM_TEST_TOKEN` / `TELEGRAM_TEST_CHAT_ID`. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_send_message() {
        let token = std::env::var("TELEGRAM_TEST_TOKEN").unwrap();
        let chat_id = std::env::var("TELEGRAM_TEST_CHAT_ID").unwrap();
        let notifier = TelegramNotifier::new(
            "https://api.telegram.org",
            &token,
            chat_id,
            Duration::from_secs(10),
        )
        .unwrap();
        notifier.send("price-watch integration test").await.unwrap();
    }
}

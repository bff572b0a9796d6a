// Notification delivery is an external collaborator (§1 Non-goals) — this
// process only needs *a* `SignalSink` to drive the onboarding_signal job
// type end to end. A real deployment swaps this for push/email/SMS
// fan-out; until then, logging is the honest default.

use async_trait::async_trait;
use money_worker::handler::onboarding_signal::SignalSink;
use money_worker::handler::JobError;

pub struct LogSignalSink;

#[async_trait]
impl SignalSink for LogSignalSink {
    async fn notify(&self, user_id: &str, signal: &str) -> Result<(), JobError> {
        log::info!("onboarding signal {signal} for user {user_id}");
        Ok(())
    }
}

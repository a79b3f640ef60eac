use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::store::DispatchStore;
use super::{normalize_phone, DispatchError};
use crate::config::SchedulerConfig;
use crate::database::models::{ScheduledMessage, ScheduledStatus};
use crate::whatsapp::WhatsAppClient;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub cadence: Duration,
    pub pacing: Duration,
    pub recovery_grace: Duration,
    pub country_code: String,
}

impl DispatchSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            cadence: Duration::from_secs(config.cadence_secs),
            pacing: Duration::from_secs(config.pacing_secs),
            recovery_grace: Duration::from_secs(config.recovery_grace_secs),
            country_code: config.default_country_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub recovered: u64,
    pub due: usize,
    pub processed: usize,
    pub skipped: usize,
    pub sent: usize,
    pub failed: usize,
    pub interrupted: bool,
}

enum Outcome {
    Finished { sent: usize, failed: usize },
    /// Another worker claimed it first
    Skipped,
    /// Stop requested mid fan-out; the row stays `processing` for recovery
    Interrupted { sent: usize, failed: usize },
}

pub struct Dispatcher {
    store: Arc<dyn DispatchStore>,
    client: Arc<dyn WhatsAppClient>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn DispatchStore>, client: Arc<dyn WhatsAppClient>, settings: DispatchSettings) -> Self {
        Self { store, client, settings }
    }

    /// Poll until `stop` flips to true; a message in flight finishes its current send first
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(
            "Dispatcher started (cadence {:?}, pacing {:?})",
            self.settings.cadence, self.settings.pacing
        );
        loop {
            match self.tick(&stop).await {
                Ok(summary) if summary.due > 0 || summary.recovered > 0 => info!(
                    "Dispatch tick: recovered={} due={} processed={} sent={} failed={}",
                    summary.recovered, summary.due, summary.processed, summary.sent, summary.failed
                ),
                Ok(_) => debug!("Dispatch tick: nothing due"),
                Err(e) => error!("Dispatch tick failed: {}", e),
            }
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.cadence) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *stop.borrow() {
                break;
            }
        }
        info!("Dispatcher stopped");
    }

    /// Recovery followed by every due message
    pub async fn tick(&self, stop: &watch::Receiver<bool>) -> Result<TickSummary, DispatchError> {
        let mut summary = TickSummary {
            recovered: self.store.recover_stale(self.settings.recovery_grace).await?,
            ..Default::default()
        };
        if summary.recovered > 0 {
            warn!("Recovered {} stalled scheduled messages", summary.recovered);
        }

        let due = self.store.due(Utc::now()).await?;
        summary.due = due.len();

        for message in due {
            if *stop.borrow() {
                summary.interrupted = true;
                break;
            }
            let id = message.id;
            match self.process(message, stop).await {
                Ok(Outcome::Finished { sent, failed }) => {
                    summary.processed += 1;
                    summary.sent += sent;
                    summary.failed += failed;
                }
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Ok(Outcome::Interrupted { sent, failed }) => {
                    summary.sent += sent;
                    summary.failed += failed;
                    summary.interrupted = true;
                    break;
                }
                Err(e) => error!("Scheduled message {} failed: {}", id, e),
            }
        }
        Ok(summary)
    }

    async fn process(&self, message: ScheduledMessage, stop: &watch::Receiver<bool>) -> Result<Outcome, DispatchError> {
        if !self.store.claim(message.id).await? {
            debug!("Scheduled message {} already claimed", message.id);
            return Ok(Outcome::Skipped);
        }

        let recipients = self.store.recipients(&message).await?;
        self.store.set_recipient_count(message.id, recipients.len()).await?;

        // a recovered row resumes after the recipients it already attempted
        let mut sent = message.sent_count.max(0) as usize;
        let mut failed = message.failed_count.max(0) as usize;
        let mut sent_now = 0;
        let mut failed_now = 0;
        let mut stop = stop.clone();
        let mut previous_send = false;

        info!(
            "Dispatching scheduled message {} to {} recipients",
            message.id,
            recipients.len()
        );

        for recipient in recipients.iter().skip(sent + failed) {
            let result = match normalize_phone(&recipient.phone, &self.settings.country_code) {
                None => Err(format!("Invalid phone number for patient {}", recipient.patient_id)),
                Some(phone) => {
                    if previous_send {
                        tokio::select! {
                            _ = tokio::time::sleep(self.settings.pacing) => {}
                            Ok(()) = stop.changed() => {}
                        }
                    }
                    if *stop.borrow() {
                        info!(
                            "Stop requested; scheduled message {} left processing after {} sends",
                            message.id,
                            sent + failed
                        );
                        return Ok(Outcome::Interrupted {
                            sent: sent_now,
                            failed: failed_now,
                        });
                    }
                    previous_send = true;
                    match self.client.send(message.user_id, &phone, &message.message).await {
                        Ok(result) if result.success => Ok(()),
                        Ok(result) => Err(result.error.unwrap_or_else(|| "Send failed".to_string())),
                        Err(e) => Err(e.to_string()),
                    }
                }
            };

            match result {
                Ok(()) => {
                    sent += 1;
                    sent_now += 1;
                    self.store.record_progress(message.id, sent, failed, None).await?;
                }
                Err(reason) => {
                    failed += 1;
                    failed_now += 1;
                    warn!(
                        "Scheduled message {} to patient {} failed: {}",
                        message.id, recipient.patient_id, reason
                    );
                    self.store
                        .record_progress(message.id, sent, failed, Some(&reason))
                        .await?;
                }
            }
        }

        let status = ScheduledStatus::from_counts(recipients.len(), sent, failed);
        self.store.finish(message.id, status, Utc::now()).await?;
        info!(
            "Scheduled message {} finished as {} (sent={} failed={})",
            message.id,
            status.as_str(),
            sent,
            failed
        );
        Ok(Outcome::Finished {
            sent: sent_now,
            failed: failed_now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeWhatsApp, MemoryDispatchStore};
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            cadence: Duration::from_secs(60),
            pacing: Duration::from_secs(12),
            recovery_grace: Duration::from_secs(600),
            country_code: "91".to_string(),
        }
    }

    fn dispatcher(store: &MemoryDispatchStore, client: &FakeWhatsApp) -> Dispatcher {
        Dispatcher::new(Arc::new(store.clone()), Arc::new(client.clone()), settings())
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_paced_and_the_last_one_is_not_followed_by_a_sleep() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let patients = vec![
            store.add_patient(clinic, "Asha", "9876543210"),
            store.add_patient(clinic, "Ravi", "9876543211"),
            store.add_patient(clinic, "Meena", "919876543212"),
        ];
        let id = store.schedule(clinic, sender, "Your report is ready", patients, Utc::now() - ChronoDuration::seconds(1));

        let (_tx, stop) = watch::channel(false);
        let started = tokio::time::Instant::now();
        let summary = dispatcher(&store, &client).tick(&stop).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(24));

        assert_eq!(summary.sent, 3);
        let sends = client.sends();
        let phones: Vec<_> = sends.iter().map(|s| s.phone.as_str()).collect();
        assert_eq!(phones, vec!["919876543210", "919876543211", "919876543212"]);
        assert_eq!(sends[1].at - sends[0].at, Duration::from_secs(12));
        assert_eq!(sends[2].at - sends[1].at, Duration::from_secs(12));
        assert!(sends.iter().all(|s| s.user_id == sender));

        let message = store.message(id);
        assert_eq!(message.status, "sent");
        assert_eq!(message.sent_count, 3);
        assert_eq!(message.recipient_count, 3);
        assert!(message.sent_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_outcomes_end_partial() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let good = store.add_patient(clinic, "Asha", "9876543210");
        let short = store.add_patient(clinic, "Ravi", "12345");
        let rejected = store.add_patient(clinic, "Meena", "9876543212");
        client.reject_phone("919876543212");
        let id = store.schedule(clinic, Uuid::new_v4(), "hi", vec![good, short, rejected], Utc::now());

        let (_tx, stop) = watch::channel(false);
        dispatcher(&store, &client).tick(&stop).await.unwrap();

        let message = store.message(id);
        assert_eq!(message.status, "partial");
        assert_eq!((message.sent_count, message.failed_count), (1, 2));
        assert!(message.last_error.is_some());
        assert_eq!(client.sends().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_count_as_failed_recipients() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        client.set_unavailable(true);
        let clinic = Uuid::new_v4();
        let patients = vec![
            store.add_patient(clinic, "Asha", "9876543210"),
            store.add_patient(clinic, "Ravi", "9876543211"),
        ];
        let id = store.schedule(clinic, Uuid::new_v4(), "hi", patients, Utc::now());

        let (_tx, stop) = watch::channel(false);
        let summary = dispatcher(&store, &client).tick(&stop).await.unwrap();
        assert_eq!(summary.failed, 2);

        let message = store.message(id);
        assert_eq!(message.status, "failed");
        assert_eq!(message.failed_count, 2);
        assert!(message.last_error.unwrap_or_default().contains("webdriver unreachable"));
    }

    #[tokio::test]
    async fn message_without_reachable_recipients_fails() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let elsewhere = store.add_patient(Uuid::new_v4(), "Other clinic", "9876543210");
        let no_phone = store.add_patient(clinic, "Asha", "  ");
        let id = store.schedule(clinic, Uuid::new_v4(), "hi", vec![elsewhere, no_phone], Utc::now());

        let (_tx, stop) = watch::channel(false);
        dispatcher(&store, &client).tick(&stop).await.unwrap();

        let message = store.message(id);
        assert_eq!(message.status, "failed");
        assert_eq!(message.recipient_count, 0);
        assert!(client.sends().is_empty());
    }

    #[tokio::test]
    async fn future_messages_are_left_alone() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let patient = store.add_patient(clinic, "Asha", "9876543210");
        let id = store.schedule(clinic, Uuid::new_v4(), "hi", vec![patient], Utc::now() + ChronoDuration::hours(1));

        let (_tx, stop) = watch::channel(false);
        let summary = dispatcher(&store, &client).tick(&stop).await.unwrap();
        assert_eq!(summary.due, 0);
        assert_eq!(store.message(id).status, "pending");
    }

    #[tokio::test]
    async fn lost_claim_is_skipped() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let patient = store.add_patient(clinic, "Asha", "9876543210");
        store.schedule(clinic, Uuid::new_v4(), "hi", vec![patient], Utc::now());
        store.deny_claims(true);

        let (_tx, stop) = watch::channel(false);
        let summary = dispatcher(&store, &client).tick(&stop).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(client.sends().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_rows_are_recovered_and_resume_after_attempted_recipients() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let first = store.add_patient(clinic, "Asha", "9876543210");
        let second = store.add_patient(clinic, "Ravi", "9876543211");
        let id = store.schedule(clinic, Uuid::new_v4(), "hi", vec![first, second], Utc::now());
        store.mark_processing(id, Utc::now() - ChronoDuration::minutes(20), 1, 0);

        let (_tx, stop) = watch::channel(false);
        let summary = dispatcher(&store, &client).tick(&stop).await.unwrap();
        assert_eq!(summary.recovered, 1);

        let phones: Vec<_> = client.sends().into_iter().map(|s| s.phone).collect();
        assert_eq!(phones, vec!["919876543211".to_string()]);
        let message = store.message(id);
        assert_eq!(message.status, "sent");
        assert_eq!(message.sent_count, 2);
    }

    #[tokio::test]
    async fn fresh_processing_rows_are_not_recovered() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let patient = store.add_patient(clinic, "Asha", "9876543210");
        let id = store.schedule(clinic, Uuid::new_v4(), "hi", vec![patient], Utc::now());
        store.mark_processing(id, Utc::now(), 0, 0);

        let (_tx, stop) = watch::channel(false);
        let summary = dispatcher(&store, &client).tick(&stop).await.unwrap();
        assert_eq!(summary.recovered, 0);
        assert_eq!(store.message(id).status, "processing");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_fan_out_leaves_message_processing() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let clinic = Uuid::new_v4();
        let patients = vec![
            store.add_patient(clinic, "Asha", "9876543210"),
            store.add_patient(clinic, "Ravi", "9876543211"),
        ];
        let id = store.schedule(clinic, Uuid::new_v4(), "hi", patients, Utc::now());

        let (tx, stop) = watch::channel(false);
        let dispatcher = Arc::new(dispatcher(&store, &client));
        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.tick(&stop).await })
        };
        while client.sends().is_empty() {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();

        let summary = task.await.unwrap().unwrap();
        assert!(summary.interrupted);
        assert_eq!(client.sends().len(), 1);
        let message = store.message(id);
        assert_eq!(message.status, "processing");
        assert_eq!(message.sent_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_on_stop() {
        let store = MemoryDispatchStore::default();
        let client = FakeWhatsApp::ready();
        let (tx, stop) = watch::channel(false);
        let dispatcher = Arc::new(dispatcher(&store, &client));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(stop).await })
        };
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}

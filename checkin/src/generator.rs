//! Periodic token minting on the claimant's device.
//!
//! One background task per generator, one fresh envelope per rotation tick.
//! Stopping the task never invalidates tokens already handed out; only the
//! validator's freshness window decides when those die.

use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::codec::{EncodeError, TokenCodec};
use crate::token::{IdentityToken, PURPOSE_ATTENDANCE};

/// Protocol default rotation period.
pub const DEFAULT_ROTATION: Duration = Duration::from_secs(30);

/// The identity a generator mints tokens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claimant {
    pub subject_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Live view of the generator's output: always holds the latest envelope.
#[derive(Debug, Clone)]
pub struct TokenStream {
    rx: watch::Receiver<String>,
}

impl TokenStream {
    /// The most recently minted envelope.
    pub fn envelope(&self) -> String {
        self.rx.borrow().clone()
    }

    /// Waits for the next rotation. Returns `false` once the generator
    /// is stopped and no further envelopes will arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

pub struct TokenGenerator {
    codec: TokenCodec,
    claimant: Claimant,
    // monotonic issue clock, shared with the minting task and kept across restarts
    last_issued_ms: Arc<AtomicI64>,
    task: Option<JoinHandle<()>>,
}

impl TokenGenerator {
    pub fn new(codec: TokenCodec, claimant: Claimant) -> Self {
        TokenGenerator {
            codec,
            claimant,
            last_issued_ms: Arc::new(AtomicI64::new(0)),
            task: None,
        }
    }

    /// Begins rotation and returns the stream of envelopes.
    ///
    /// The first envelope is minted before this returns, so the stream is
    /// never empty. Restartable: calling `start` again replaces any running
    /// task and the issue clock stays monotonic across the restart.
    pub fn start(&mut self, rotation: Duration) -> Result<TokenStream, EncodeError> {
        self.stop();

        let first = mint(&self.codec, &self.claimant, &self.last_issued_ms)?;
        let (tx, rx) = watch::channel(first);

        let codec = self.codec.clone();
        let claimant = self.claimant.clone();
        let last_issued_ms = Arc::clone(&self.last_issued_ms);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rotation);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick fires immediately; the initial envelope covers it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match mint(&codec, &claimant, &last_issued_ms) {
                    Ok(envelope) => {
                        if tx.send(envelope).is_err() {
                            break; // nobody is listening anymore
                        }
                    }
                    Err(e) => log::warn!(
                        "token rotation for subject {} skipped a tick: {e}",
                        claimant.subject_id
                    ),
                }
            }
        }));

        Ok(TokenStream { rx })
    }

    /// Cancels the rotation task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!(
                "token generator for subject {} stopped",
                self.claimant.subject_id
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TokenGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn mint(
    codec: &TokenCodec,
    claimant: &Claimant,
    last_issued_ms: &AtomicI64,
) -> Result<String, EncodeError> {
    let now = Utc::now().timestamp_millis();
    // issue times are strictly increasing per subject, even within one millisecond
    let mut prev = last_issued_ms.load(Ordering::Relaxed);
    let issued = loop {
        let next = now.max(prev + 1);
        match last_issued_ms.compare_exchange(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break next,
            Err(observed) => prev = observed,
        }
    };

    codec.encode(&IdentityToken {
        subject_id: claimant.subject_id,
        first_name: claimant.first_name.clone(),
        last_name: claimant.last_name.clone(),
        email: claimant.email.clone(),
        timestamp: issued,
        purpose: PURPOSE_ATTENDANCE.into(),
        nonce: OsRng.next_u64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{KeyRing, SharedKey};
    use tokio::time::timeout;

    fn codec() -> TokenCodec {
        TokenCodec::new(KeyRing::new(1, SharedKey::generate()))
    }

    fn claimant() -> Claimant {
        Claimant {
            subject_id: 7,
            first_name: "Lebo".into(),
            last_name: "Mokoena".into(),
            email: "u07070707@test.com".into(),
        }
    }

    #[tokio::test]
    async fn stream_carries_a_valid_envelope_immediately() {
        let c = codec();
        let mut generator = TokenGenerator::new(c.clone(), claimant());
        let stream = generator.start(DEFAULT_ROTATION).unwrap();

        let token = c.decode(&stream.envelope()).unwrap();
        assert_eq!(token.subject_id, 7);
        assert_eq!(token.purpose, PURPOSE_ATTENDANCE);
    }

    #[tokio::test]
    async fn rotation_produces_fresh_envelopes() {
        let c = codec();
        let mut generator = TokenGenerator::new(c.clone(), claimant());
        let mut stream = generator.start(Duration::from_millis(10)).unwrap();

        let first = stream.envelope();
        let rotated = timeout(Duration::from_millis(500), stream.changed())
            .await
            .expect("rotation tick");
        assert!(rotated);
        let second = stream.envelope();
        assert_ne!(first, second);

        let t1 = c.decode(&first).unwrap();
        let t2 = c.decode(&second).unwrap();
        assert!(t2.timestamp > t1.timestamp, "issue clock must be monotonic");
        assert_ne!(t1.nonce, t2.nonce);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_restart_works() {
        let mut generator = TokenGenerator::new(codec(), claimant());
        let _ = generator.start(DEFAULT_ROTATION).unwrap();
        assert!(generator.is_running());

        generator.stop();
        generator.stop();
        assert!(!generator.is_running());

        let stream = generator.start(DEFAULT_ROTATION).unwrap();
        assert!(generator.is_running());
        assert!(!stream.envelope().is_empty());
    }

    #[tokio::test]
    async fn stopping_does_not_invalidate_issued_envelopes() {
        let c = codec();
        let mut generator = TokenGenerator::new(c.clone(), claimant());
        let stream = generator.start(DEFAULT_ROTATION).unwrap();
        let envelope = stream.envelope();
        generator.stop();

        // the envelope still decodes; freshness is the validator's call
        assert!(c.decode(&envelope).is_ok());
    }
}

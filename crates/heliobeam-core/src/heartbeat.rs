//! Heartbeat emission and liveness monitoring.
//!
//! While a beam is active the GRN emits a heartbeat every
//! `heartbeat_interval`; the MOR answers each verified heartbeat with a
//! `HeartbeatAck`. Each side runs a [`LivenessMonitor`] over the messages it
//! receives, so each side independently knows when the other went silent.
//!
//! # Clocks
//!
//! Sender timestamps are only bound into the MAC (and bounded by
//! `max_clock_skew`) to stop replays. Timeout arithmetic always uses the
//! receiver's own monotonic clock: `elapsed = now - last_valid_heartbeat`.
//!
//! # Invariants
//!
//! - A rejected message never touches the monitor's state.
//! - Accepted timestamps are strictly increasing per session.
//! - Once `elapsed > timeout_threshold` the monitor reports
//!   [`Liveness::Expired`] until re-armed.

use std::time::{Duration, Instant};

use heliobeam_proto::{Heartbeat, HeartbeatAck, ProtocolError};
use thiserror::Error;

use crate::{
    crypto::{SessionKey, Tag},
    env::Moment,
    error::BeamAuthError,
    identity::NodeId,
};

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Emission period on the GRN
    pub heartbeat_interval: Duration,
    /// Silence after which the beam is cut; must exceed the interval
    pub timeout_threshold: Duration,
    /// Largest accepted gap between a heartbeat timestamp and local wall time
    pub max_clock_skew: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(50),
            timeout_threshold: Duration::from_millis(100),
            max_clock_skew: Duration::from_secs(1),
        }
    }
}

impl LivenessConfig {
    /// Check the timing constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the interval is zero or the threshold does
    /// not exceed it.
    pub fn validate(&self) -> Result<(), BeamAuthError> {
        if self.heartbeat_interval.is_zero() {
            return Err(BeamAuthError::InvalidConfig {
                reason: "heartbeat_interval must be non-zero".to_string(),
            });
        }
        if self.timeout_threshold <= self.heartbeat_interval {
            return Err(BeamAuthError::InvalidConfig {
                reason: format!(
                    "timeout_threshold ({:?}) must exceed heartbeat_interval ({:?})",
                    self.timeout_threshold, self.heartbeat_interval
                ),
            });
        }
        Ok(())
    }
}

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Peer proved liveness recently
    Alive {
        /// Time left before the window closes
        remaining: Duration,
    },
    /// Window closed
    Expired {
        /// Time since the last verified message
        elapsed: Duration,
    },
    /// No session is being monitored
    Disarmed,
}

impl Liveness {
    /// Whether the beam must be cut.
    #[must_use]
    pub fn should_defocus(self) -> bool {
        !matches!(self, Self::Alive { .. })
    }
}

/// Why a heartbeat or heartbeat ack was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatRejection {
    /// Sender is not the session peer
    #[error("heartbeat from {actual}, session peer is {expected}")]
    WrongNode {
        /// Session peer
        expected: NodeId,
        /// Claimed sender
        actual: String,
    },

    /// Timestamp too far from local wall time
    #[error("timestamp {timestamp_ms} ms is outside the skew window around {local_ms} ms")]
    OutOfWindow {
        /// Sender timestamp
        timestamp_ms: u64,
        /// Receiver wall time
        local_ms: u64,
    },

    /// Timestamp not newer than the last accepted one
    #[error("timestamp {timestamp_ms} ms is not after last accepted {last_ms} ms")]
    Stale {
        /// Sender timestamp
        timestamp_ms: u64,
        /// Last accepted timestamp
        last_ms: u64,
    },

    /// MAC field is not 32 bytes of hex
    #[error("malformed MAC: {0}")]
    MalformedMac(ProtocolError),

    /// MAC does not verify under the session key
    #[error("MAC mismatch")]
    MacMismatch,

    /// Ack for a heartbeat that was never sent
    #[error("ack for timestamp {timestamp_ms} ms that was never sent")]
    NotYetSent {
        /// Acknowledged timestamp
        timestamp_ms: u64,
    },
}

/// GRN-side heartbeat scheduler.
#[derive(Debug, Clone)]
pub struct HeartbeatEmitter {
    interval: Duration,
    last_sent: Option<Instant>,
    last_timestamp_ms: Option<u64>,
}

impl HeartbeatEmitter {
    /// Emitter that has sent nothing yet.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_sent: None, last_timestamp_ms: None }
    }

    /// Whether a heartbeat should go out at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Timestamp of the most recent heartbeat.
    #[must_use]
    pub fn last_timestamp_ms(&self) -> Option<u64> {
        self.last_timestamp_ms
    }

    /// Build the next heartbeat.
    ///
    /// Timestamps are strictly increasing: two heartbeats in the same
    /// millisecond (or after the wall clock stepped back) get `last + 1`.
    pub fn emit(&mut self, node_id: &NodeId, key: &SessionKey, at: Moment) -> Heartbeat {
        let wall = at.unix_millis();
        let timestamp = match self.last_timestamp_ms {
            Some(last) if wall <= last => last.saturating_add(1),
            _ => wall,
        };

        self.last_sent = Some(at.instant);
        self.last_timestamp_ms = Some(timestamp);

        Heartbeat {
            node_id: node_id.to_string(),
            timestamp,
            hmac: key.heartbeat_tag(timestamp).to_hex(),
        }
    }

    /// Forget emission history (new session).
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.last_timestamp_ms = None;
    }
}

/// Receiver-clock liveness tracker.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    config: LivenessConfig,
    last_valid: Option<Instant>,
    last_timestamp_ms: Option<u64>,
}

impl LivenessMonitor {
    /// Disarmed monitor.
    #[must_use]
    pub fn new(config: LivenessConfig) -> Self {
        Self { config, last_valid: None, last_timestamp_ms: None }
    }

    /// Timing in use.
    #[must_use]
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Start the window at `now` (session just became active).
    pub fn arm(&mut self, now: Instant) {
        self.last_valid = Some(now);
        self.last_timestamp_ms = None;
    }

    /// Stop monitoring.
    pub fn disarm(&mut self) {
        self.last_valid = None;
        self.last_timestamp_ms = None;
    }

    /// Receiver time of the last verified message, or the arm time.
    #[must_use]
    pub fn last_valid_heartbeat_time(&self) -> Option<Instant> {
        self.last_valid
    }

    /// Liveness as of `now`.
    #[must_use]
    pub fn check(&self, now: Instant) -> Liveness {
        let Some(last) = self.last_valid else {
            return Liveness::Disarmed;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed > self.config.timeout_threshold {
            Liveness::Expired { elapsed }
        } else {
            Liveness::Alive { remaining: self.config.timeout_threshold - elapsed }
        }
    }

    /// Verify a heartbeat from `peer` and, if valid, refresh the window.
    ///
    /// # Errors
    ///
    /// Returns the first failed check; the monitor is left untouched.
    pub fn verify_heartbeat(
        &mut self,
        heartbeat: &Heartbeat,
        peer: &NodeId,
        key: &SessionKey,
        at: Moment,
    ) -> Result<(), HeartbeatRejection> {
        check_sender(peer, &heartbeat.node_id)?;

        let local_ms = at.unix_millis();
        let skew = Duration::from_millis(heartbeat.timestamp.abs_diff(local_ms));
        if skew > self.config.max_clock_skew {
            return Err(HeartbeatRejection::OutOfWindow {
                timestamp_ms: heartbeat.timestamp,
                local_ms,
            });
        }

        self.check_fresh(heartbeat.timestamp)?;
        check_tag(&heartbeat.hmac, &key.heartbeat_tag(heartbeat.timestamp))?;

        self.accept(heartbeat.timestamp, at.instant);
        Ok(())
    }

    /// Verify a heartbeat ack from `peer` and, if valid, refresh the window.
    ///
    /// `last_sent_ms` is the timestamp of the newest heartbeat this node
    /// emitted; an ack beyond it acknowledges something never sent.
    ///
    /// # Errors
    ///
    /// Returns the first failed check; the monitor is left untouched.
    pub fn verify_ack(
        &mut self,
        ack: &HeartbeatAck,
        peer: &NodeId,
        key: &SessionKey,
        last_sent_ms: Option<u64>,
        at: Moment,
    ) -> Result<(), HeartbeatRejection> {
        check_sender(peer, &ack.node_id)?;

        if last_sent_ms.is_none_or(|sent| ack.timestamp > sent) {
            return Err(HeartbeatRejection::NotYetSent { timestamp_ms: ack.timestamp });
        }

        self.check_fresh(ack.timestamp)?;
        check_tag(&ack.hmac, &key.heartbeat_ack_tag(ack.timestamp))?;

        self.accept(ack.timestamp, at.instant);
        Ok(())
    }

    fn check_fresh(&self, timestamp_ms: u64) -> Result<(), HeartbeatRejection> {
        match self.last_timestamp_ms {
            Some(last_ms) if timestamp_ms <= last_ms => {
                Err(HeartbeatRejection::Stale { timestamp_ms, last_ms })
            },
            _ => Ok(()),
        }
    }

    fn accept(&mut self, timestamp_ms: u64, now: Instant) {
        self.last_valid = Some(now);
        self.last_timestamp_ms = Some(timestamp_ms);
    }
}

fn check_sender(peer: &NodeId, claimed: &str) -> Result<(), HeartbeatRejection> {
    if peer.matches(claimed) {
        Ok(())
    } else {
        Err(HeartbeatRejection::WrongNode { expected: peer.clone(), actual: claimed.to_string() })
    }
}

fn check_tag(presented_hex: &str, expected: &Tag) -> Result<(), HeartbeatRejection> {
    let presented = Tag::from_hex("hmac", presented_hex).map_err(HeartbeatRejection::MalformedMac)?;
    if expected.ct_eq(&presented) { Ok(()) } else { Err(HeartbeatRejection::MacMismatch) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::Nonce, secrets::DeviceSecret};

    const EPOCH_MS: u64 = 1_700_000_000_000;

    fn key() -> SessionKey {
        SessionKey::derive(&DeviceSecret::from_bytes([5; 32]), &Nonce::from_bytes([6; 16]))
    }

    fn start() -> Moment {
        Moment::new(Instant::now(), Duration::from_millis(EPOCH_MS))
    }

    fn grn() -> NodeId {
        NodeId::from("GRN-001")
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn config_validation() {
        assert!(LivenessConfig::default().validate().is_ok());

        let equal = LivenessConfig { timeout_threshold: ms(50), ..LivenessConfig::default() };
        assert!(matches!(equal.validate(), Err(BeamAuthError::InvalidConfig { .. })));

        let zero = LivenessConfig { heartbeat_interval: Duration::ZERO, ..LivenessConfig::default() };
        assert!(matches!(zero.validate(), Err(BeamAuthError::InvalidConfig { .. })));
    }

    #[test]
    fn emitter_cadence() {
        let t0 = start();
        let mut emitter = HeartbeatEmitter::new(ms(50));
        assert!(emitter.is_due(t0.instant));

        emitter.emit(&grn(), &key(), t0);
        assert!(!emitter.is_due((t0 + ms(49)).instant));
        assert!(emitter.is_due((t0 + ms(50)).instant));

        emitter.reset();
        assert!(emitter.is_due(t0.instant));
        assert_eq!(emitter.last_timestamp_ms(), None);
    }

    #[test]
    fn emitter_timestamps_strictly_increase() {
        let t0 = start();
        let mut emitter = HeartbeatEmitter::new(ms(50));

        let a = emitter.emit(&grn(), &key(), t0);
        let b = emitter.emit(&grn(), &key(), t0);
        assert_eq!(a.timestamp, EPOCH_MS);
        assert_eq!(b.timestamp, EPOCH_MS + 1);
    }

    #[test]
    fn window_opens_and_closes() {
        let t0 = start();
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        assert_eq!(monitor.check(t0.instant), Liveness::Disarmed);

        monitor.arm(t0.instant);
        assert_eq!(monitor.check(t0.instant), Liveness::Alive { remaining: ms(100) });
        assert_eq!(monitor.check((t0 + ms(100)).instant), Liveness::Alive { remaining: ms(0) });
        assert_eq!(monitor.check((t0 + ms(101)).instant), Liveness::Expired { elapsed: ms(101) });
        assert!(monitor.check((t0 + ms(101)).instant).should_defocus());
    }

    #[test]
    fn valid_heartbeat_refreshes_with_receiver_clock() {
        let t0 = start();
        let mut emitter = HeartbeatEmitter::new(ms(50));
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        monitor.arm(t0.instant);

        // Sender clock runs 500 ms ahead; only the receipt time matters.
        let mut sender_view = t0 + ms(80);
        sender_view.unix += ms(500);
        let heartbeat = emitter.emit(&grn(), &key(), sender_view);

        let received = t0 + ms(80);
        monitor.verify_heartbeat(&heartbeat, &grn(), &key(), received).unwrap();
        assert_eq!(monitor.last_valid_heartbeat_time(), Some(received.instant));
        assert_eq!(monitor.check((t0 + ms(180)).instant), Liveness::Alive { remaining: ms(0) });
    }

    #[test]
    fn rejected_heartbeats_leave_state_untouched() {
        let t0 = start();
        let mut emitter = HeartbeatEmitter::new(ms(50));
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        monitor.arm(t0.instant);

        let genuine = emitter.emit(&grn(), &key(), t0 + ms(10));
        let later = t0 + ms(20);

        let mut tampered = genuine.clone();
        tampered.timestamp += 1;
        assert_eq!(
            monitor.verify_heartbeat(&tampered, &grn(), &key(), later),
            Err(HeartbeatRejection::MacMismatch)
        );

        let wrong_key = SessionKey::derive(&DeviceSecret::from_bytes([7; 32]), &Nonce::from_bytes([6; 16]));
        assert_eq!(
            monitor.verify_heartbeat(&genuine, &grn(), &wrong_key, later),
            Err(HeartbeatRejection::MacMismatch)
        );

        let mut garbled = genuine.clone();
        garbled.hmac = "zz".to_string();
        assert!(matches!(
            monitor.verify_heartbeat(&garbled, &grn(), &key(), later),
            Err(HeartbeatRejection::MalformedMac(_))
        ));

        assert!(matches!(
            monitor.verify_heartbeat(&genuine, &NodeId::from("GRN-002"), &key(), later),
            Err(HeartbeatRejection::WrongNode { .. })
        ));

        assert_eq!(monitor.last_valid_heartbeat_time(), Some(t0.instant));
    }

    #[test]
    fn replayed_heartbeat_is_stale() {
        let t0 = start();
        let mut emitter = HeartbeatEmitter::new(ms(50));
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        monitor.arm(t0.instant);

        let heartbeat = emitter.emit(&grn(), &key(), t0);
        monitor.verify_heartbeat(&heartbeat, &grn(), &key(), t0 + ms(1)).unwrap();

        assert_eq!(
            monitor.verify_heartbeat(&heartbeat, &grn(), &key(), t0 + ms(60)),
            Err(HeartbeatRejection::Stale { timestamp_ms: EPOCH_MS, last_ms: EPOCH_MS })
        );
        assert_eq!(monitor.last_valid_heartbeat_time(), Some((t0 + ms(1)).instant));
    }

    #[test]
    fn heartbeat_outside_skew_window() {
        let t0 = start();
        let mut emitter = HeartbeatEmitter::new(ms(50));
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        monitor.arm(t0.instant);

        let old = emitter.emit(&grn(), &key(), t0);
        let err = monitor.verify_heartbeat(&old, &grn(), &key(), t0 + ms(1_001)).unwrap_err();
        assert!(matches!(err, HeartbeatRejection::OutOfWindow { .. }));
    }

    #[test]
    fn ack_must_match_a_sent_heartbeat() {
        let t0 = start();
        let mor = NodeId::from("MOR-001");
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        monitor.arm(t0.instant);

        let ack = HeartbeatAck {
            node_id: mor.to_string(),
            timestamp: EPOCH_MS,
            hmac: key().heartbeat_ack_tag(EPOCH_MS).to_hex(),
        };

        assert_eq!(
            monitor.verify_ack(&ack, &mor, &key(), None, t0),
            Err(HeartbeatRejection::NotYetSent { timestamp_ms: EPOCH_MS })
        );
        assert_eq!(
            monitor.verify_ack(&ack, &mor, &key(), Some(EPOCH_MS - 1), t0),
            Err(HeartbeatRejection::NotYetSent { timestamp_ms: EPOCH_MS })
        );

        let received = t0 + ms(30);
        monitor.verify_ack(&ack, &mor, &key(), Some(EPOCH_MS), received).unwrap();
        assert_eq!(monitor.last_valid_heartbeat_time(), Some(received.instant));

        // A heartbeat tag is not an ack tag.
        let mut forged = ack.clone();
        forged.timestamp = EPOCH_MS + 1;
        forged.hmac = key().heartbeat_tag(EPOCH_MS + 1).to_hex();
        assert_eq!(
            monitor.verify_ack(&forged, &mor, &key(), Some(EPOCH_MS + 1), received),
            Err(HeartbeatRejection::MacMismatch)
        );
    }
}

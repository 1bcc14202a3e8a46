//! In-process group messaging simulation.
//!
//! A [`GroupCluster`] forms one group, then members take turns sending. Sent
//! envelopes wait in an in-flight pool and are delivered in random order, so
//! receivers see reordering up to the configured window. Senders can rotate
//! their keys mid-run, leaving older envelopes to be absorbed by retired
//! keys. Every random choice comes from the cluster's [`chorus_harness::SimEnv`],
//! so a run is a pure function of its [`SimConfig`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chorus_crypto::{Environment, GroupMessageEnvelope};
use chorus_harness::{GroupCluster, evm_identities};
use chorus_session::{SessionConfig, SessionError};
use thiserror::Error;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// RNG seed
    pub seed: u64,
    /// Number of group members (including the creator)
    pub members: usize,
    /// Number of messages to send
    pub messages: u32,
    /// Envelopes held in flight before one is delivered
    pub reorder_window: usize,
    /// Rotate the sender's key before every n-th message
    pub rotate_every: Option<u32>,
    /// Simulated time between sends (millis)
    pub tick_millis: u64,
    /// Session configuration shared by every member
    pub session: SessionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            members: 3,
            messages: 100,
            reorder_window: 8,
            rotate_every: None,
            tick_millis: 10,
            session: SessionConfig::default(),
        }
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimReport {
    /// Group formed for the run
    pub group_id: String,
    /// Messages sent
    pub sent: u32,
    /// Successful decryptions across all receivers
    pub delivered: u64,
    /// Rejected deliveries across all receivers
    pub rejected: u64,
    /// Rejections a fresh distribution could have resolved
    pub redistribution_requests: u64,
    /// Sender key rotations performed
    pub rotations: u32,
}

/// Simulation failures.
#[derive(Debug, Error)]
pub enum SimError {
    /// Configuration cannot produce a meaningful run
    #[error("invalid simulation config: {reason}")]
    InvalidConfig {
        /// What is wrong
        reason: String,
    },

    /// Session operation failed on the sending side
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A receiver decrypted different bytes than were sent
    #[error("message {message_id} decrypted to different plaintext")]
    PlaintextMismatch {
        /// Envelope message id
        message_id: String,
    },
}

struct InFlight {
    from: usize,
    envelope: GroupMessageEnvelope,
    plaintext: Vec<u8>,
}

/// Run a simulation to completion.
///
/// Receiver-side rejections are counted, not returned; only sender-side
/// failures and plaintext mismatches abort the run.
pub async fn run(config: &SimConfig) -> Result<SimReport, SimError> {
    if config.members < 2 {
        return Err(SimError::InvalidConfig { reason: "at least two members required".to_string() });
    }
    if config.reorder_window == 0 {
        return Err(SimError::InvalidConfig { reason: "reorder window must be positive".to_string() });
    }

    let cluster =
        GroupCluster::with_config(config.seed, evm_identities(config.members), &config.session)?;
    let group_id = cluster.form_group("simulation").await?;

    let mut report = SimReport {
        group_id: group_id.clone(),
        sent: 0,
        delivered: 0,
        rejected: 0,
        redistribution_requests: 0,
        rotations: 0,
    };
    let mut in_flight: Vec<InFlight> = Vec::with_capacity(config.reorder_window);

    for n in 0..config.messages {
        cluster.env().advance_clock(config.tick_millis);
        let from = pick(&cluster, config.members);

        if let Some(every) = config.rotate_every
            && every > 0
            && n > 0
            && n % every == 0
        {
            let distribution = cluster.member(from).rotate_sender_key(&group_id).await?;
            cluster.broadcast_distribution(from, &distribution).await?;
            report.rotations += 1;
        }

        let plaintext = format!("message {n} from member {from}").into_bytes();
        let envelope = cluster.member(from).send_message(&group_id, &plaintext).await?;
        report.sent += 1;
        in_flight.push(InFlight { from, envelope, plaintext });

        if in_flight.len() >= config.reorder_window {
            let index = pick(&cluster, in_flight.len());
            deliver(&cluster, in_flight.swap_remove(index), &mut report).await?;
        }
    }

    while !in_flight.is_empty() {
        let index = pick(&cluster, in_flight.len());
        deliver(&cluster, in_flight.swap_remove(index), &mut report).await?;
    }

    tracing::info!(
        %group_id,
        sent = report.sent,
        delivered = report.delivered,
        rejected = report.rejected,
        rotations = report.rotations,
        "simulation complete"
    );

    Ok(report)
}

fn pick(cluster: &GroupCluster, bound: usize) -> usize {
    cluster.env().random_u32() as usize % bound
}

async fn deliver(
    cluster: &GroupCluster,
    message: InFlight,
    report: &mut SimReport,
) -> Result<(), SimError> {
    for result in cluster.deliver(message.from, &message.envelope).await {
        match result {
            Ok(plaintext) if plaintext == message.plaintext => report.delivered += 1,
            Ok(_) => {
                return Err(SimError::PlaintextMismatch {
                    message_id: message.envelope.message_id.clone(),
                });
            },
            Err(err) => {
                report.rejected += 1;
                if err.should_request_redistribution() {
                    report.redistribution_requests += 1;
                }
            },
        }
    }
    Ok(())
}

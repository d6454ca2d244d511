//! Offer, answer and ICE candidate records relayed through the server.
//!
//! Peers that cannot reach each other yet exchange connection material as
//! [`SignalRecord`] rows in a [`SignalStore`](crate::store::SignalStore).
//! Records are drained by the receiver and purged once stale.

use backchannel_transport::core::transport::IceCandidateInit;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::peer_id::PeerId;

/// Connection material carried by a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalPayload {
    /// WebRTC offer SDP from the dialing side.
    Offer {
        /// Serialized session description.
        sdp: String,
    },
    /// WebRTC answer SDP from the answering side.
    Answer {
        /// Serialized session description.
        sdp: String,
    },
    /// Trickled ICE candidate.
    IceCandidate(IceCandidateInit),
}

/// One relayed signal between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Unique id of this record.
    pub id: Uuid,
    /// Peer that produced the signal.
    pub sender_id: PeerId,
    /// Peer the signal is addressed to.
    pub receiver_id: PeerId,
    /// The connection material itself.
    pub payload: SignalPayload,
    /// When the record was created, used for staleness purging.
    pub created_at: DateTime<Utc>,
}

impl SignalRecord {
    /// New record addressed from `sender_id` to `receiver_id`.
    pub fn new(sender_id: PeerId, receiver_id: PeerId, payload: SignalPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_record_bincode_round_trip() {
        let record = SignalRecord::new(
            PeerId::random(),
            PeerId::random(),
            SignalPayload::IceCandidate(IceCandidateInit {
                candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 54400 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            }),
        );
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: SignalRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
    }
}

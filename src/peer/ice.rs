use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};

use super::types::{Candidate, SessionDescription};

/// Engine candidate to the wire form
pub fn from_rtc(cand: &RTCIceCandidate) -> Option<Candidate> {
    match cand.to_json() {
        Ok(init) => Some(Candidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }),
        Err(e) => {
            warn!("cannot serialise local candidate: {}", e);
            None
        }
    }
}

pub fn to_init(candidate: Candidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: None,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[Candidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        debug!("no TURN relay candidates gathered, connection through symmetric NAT may fail");
    }
    summary
}

fn dtls_fingerprint(desc: &SessionDescription) -> Option<&str> {
    desc.sdp
        .lines()
        .find_map(|line| line.trim().strip_prefix("a=fingerprint:"))
        .map(str::trim)
}

/// Short authentication string both peers can read out to each other.
///
/// Hash of the two DTLS certificate fingerprints in sorted order, so caller
/// and callee arrive at the same 12 hex characters.
pub fn session_fingerprint(
    local: &SessionDescription,
    remote: &SessionDescription,
) -> Option<String> {
    let mut prints = [dtls_fingerprint(local)?, dtls_fingerprint(remote)?];
    prints.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(prints[0].as_bytes());
    hasher.update(b"\n");
    hasher.update(prints[1].as_bytes());
    let digest = hasher.finalize();
    Some(hex::encode(&digest[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_candidate_types() {
        let candidates = vec![
            Candidate::new("candidate:1 1 udp 2122 192.168.1.2 5000 typ host"),
            Candidate::new("candidate:2 1 udp 1686 203.0.113.7 6000 typ srflx raddr 0.0.0.0"),
            Candidate::new("candidate:3 1 udp 41 198.51.100.1 7000 typ relay raddr 0.0.0.0"),
            Candidate::new("candidate:4 1 udp 2122 192.168.1.3 5001 typ host"),
        ];
        assert_eq!(
            analyze_candidates(&candidates),
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }

    #[test]
    fn fingerprint_is_symmetric() {
        let a = SessionDescription::offer("v=0\r\na=fingerprint:sha-256 AA:BB\r\n");
        let b = SessionDescription::answer("v=0\r\na=fingerprint:sha-256 CC:DD\r\n");
        let from_a = session_fingerprint(&a, &b).unwrap();
        let from_b = session_fingerprint(&b, &a).unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_a.len(), 12);
    }

    #[test]
    fn fingerprint_needs_both_sides() {
        let a = SessionDescription::offer("v=0\r\na=fingerprint:sha-256 AA:BB\r\n");
        let b = SessionDescription::answer("v=0\r\n");
        assert!(session_fingerprint(&a, &b).is_none());
    }

    #[test]
    fn candidate_round_trips_through_engine_init() {
        let c = Candidate::new("candidate:1 1 udp 2122 192.168.1.2 5000 typ host");
        let init = to_init(c.clone());
        assert_eq!(init.candidate, c.candidate);
        assert_eq!(init.sdp_mline_index, Some(0));
    }
}

//! Offer/answer state machine
//!
//! Caller: `Idle -> Offering -> OfferSent -> AnswerReceived -> Connected`.
//! Callee: `Idle -> OfferReceived -> AnswerSent -> Connected`.
//! Either side may drop to `Closed` from any state.
//!
//! The caller does not trickle: candidates gathered after the offer is
//! committed are collected and the whole local description, candidates
//! embedded, goes out as one `invite` once gathering completes (or the
//! gathering timeout fires). The callee answers straight away and only
//! streams its own candidates when `stream_callee_candidates` is set.

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SessionError;
use crate::peer::ice::{analyze_candidates, session_fingerprint};
use crate::peer::transport::MediaTransport;
use crate::peer::types::{Candidate, SdpType, SessionDescription};
use crate::session::{Role, Session, SessionState};
use crate::signaling::{SignalingChannel, SignalingMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// Offer committed locally, gathering candidates
    Offering,
    OfferSent,
    AnswerReceived,
    OfferReceived,
    AnswerSent,
    /// Both descriptions committed
    Connected,
    Closed,
}

impl NegotiationState {
    pub fn can_advance_to(self, next: NegotiationState) -> bool {
        use NegotiationState::*;
        matches!(
            (self, next),
            (Idle, Offering)
                | (Offering, OfferSent)
                | (OfferSent, AnswerReceived)
                | (AnswerReceived, Connected)
                | (Idle, OfferReceived)
                | (OfferReceived, AnswerSent)
                | (AnswerSent, Connected)
                | (_, Closed)
        )
    }

    pub fn is_complete(self) -> bool {
        self == NegotiationState::Connected
    }
}

fn advance(session: &mut Session, next: NegotiationState) -> Result<(), SessionError> {
    let current = session.negotiation();
    if !current.can_advance_to(next) {
        return Err(SessionError::invalid_state(format!(
            "negotiation cannot move from {:?} to {:?}",
            current, next
        )));
    }
    debug!("negotiation {:?} -> {:?}", current, next);
    session.set_negotiation(next);
    Ok(())
}

/// Drives one session's offer/answer exchange.
///
/// Borrowed for the duration of a single event; the call loop builds a new
/// one per event so the session is never shared.
pub struct Negotiator<'a> {
    session: &'a mut Session,
    transport: &'a dyn MediaTransport,
    signaling: &'a dyn SignalingChannel,
    config: &'a Config,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        session: &'a mut Session,
        transport: &'a dyn MediaTransport,
        signaling: &'a dyn SignalingChannel,
        config: &'a Config,
    ) -> Self {
        Self {
            session,
            transport,
            signaling,
            config,
        }
    }

    /// Caller: generate and commit the offer. The data channel must already
    /// exist so the offer describes it. Gathering starts here; the invite
    /// goes out from [`on_local_candidate`](Self::on_local_candidate).
    pub async fn start_offer(&mut self) -> Result<(), SessionError> {
        if self.session.role() != Some(Role::Caller) {
            return Err(SessionError::invalid_state("only the caller offers"));
        }
        advance(self.session, NegotiationState::Offering)?;
        let offer = self
            .transport
            .create_offer()
            .await
            .map_err(SessionError::negotiation)?;
        self.transport
            .set_local_description(offer)
            .await
            .map_err(SessionError::negotiation)?;
        info!(room = %self.session.room(), "offer committed, gathering candidates");
        Ok(())
    }

    /// A candidate (or `None` for end of gathering) from our own transport
    pub async fn on_local_candidate(
        &mut self,
        candidate: Option<Candidate>,
    ) -> Result<(), SessionError> {
        if let Some(c) = &candidate {
            self.session.push_local_candidate(c.clone());
        }
        match self.session.role() {
            Some(Role::Caller) => {
                if candidate.is_none() {
                    self.send_invite().await?;
                }
            }
            Some(Role::Callee) if self.config.stream_callee_candidates => {
                let c = candidate.unwrap_or_else(Candidate::end_of_candidates);
                self.signaling
                    .send(SignalingMessage::IceCandidate(c))
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Send the invite with whatever has been gathered so far
    pub async fn on_gathering_timeout(&mut self) -> Result<(), SessionError> {
        if self.session.negotiation() != NegotiationState::Offering {
            return Ok(());
        }
        warn!(
            "candidate gathering did not finish within {:?}, sending offer with {} candidate(s)",
            self.config.gather_timeout(),
            self.session.pending_local_candidates().len()
        );
        self.send_invite().await
    }

    async fn send_invite(&mut self) -> Result<(), SessionError> {
        if self.session.negotiation() != NegotiationState::Offering {
            debug!("invite already sent");
            return Ok(());
        }
        let offer = self
            .transport
            .local_description()
            .await
            .ok_or_else(|| SessionError::negotiation("no local offer to send"))?;
        let embedded = offer.embedded_candidates();
        if embedded.is_empty() {
            analyze_candidates(self.session.pending_local_candidates());
        } else {
            analyze_candidates(&embedded);
        }
        self.signaling
            .send(SignalingMessage::Invite(offer.clone()))
            .await?;
        self.session.set_local_description(offer)?;
        advance(self.session, NegotiationState::OfferSent)?;
        info!(room = %self.session.room(), "invite sent");
        Ok(())
    }

    /// Callee: accept the caller's offer and answer it immediately.
    /// Returns the session fingerprint once negotiation is complete.
    pub async fn on_invite(
        &mut self,
        offer: SessionDescription,
    ) -> Result<Option<String>, SessionError> {
        if self.session.role() == Some(Role::Caller) {
            return Err(SessionError::invalid_state("caller received an invite"));
        }
        if self.session.negotiation() != NegotiationState::Idle {
            return Err(SessionError::invalid_state(format!(
                "invite received while {:?}",
                self.session.negotiation()
            )));
        }
        if offer.sdp_type != SdpType::Offer {
            return Err(SessionError::negotiation(format!(
                "invite carries an {}",
                offer.sdp_type
            )));
        }
        self.session.assign_role(Role::Callee)?;
        self.session.set_state(SessionState::Negotiating);
        advance(self.session, NegotiationState::OfferReceived)?;

        self.transport
            .set_remote_description(offer.clone())
            .await
            .map_err(SessionError::negotiation)?;
        self.session.set_remote_description(offer)?;

        let answer = self
            .transport
            .create_answer()
            .await
            .map_err(SessionError::negotiation)?;
        self.transport
            .set_local_description(answer.clone())
            .await
            .map_err(SessionError::negotiation)?;
        self.session.set_local_description(answer.clone())?;

        self.signaling.send(SignalingMessage::Ok(answer)).await?;
        advance(self.session, NegotiationState::AnswerSent)?;
        info!(room = %self.session.room(), "answer sent");
        self.complete()
    }

    /// Caller: commit the callee's answer
    pub async fn on_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<Option<String>, SessionError> {
        if self.session.role() != Some(Role::Caller)
            || self.session.negotiation() != NegotiationState::OfferSent
        {
            return Err(SessionError::invalid_state(format!(
                "answer received while {:?}",
                self.session.negotiation()
            )));
        }
        if answer.sdp_type != SdpType::Answer {
            return Err(SessionError::negotiation(format!(
                "ok carries an {}",
                answer.sdp_type
            )));
        }
        self.transport
            .set_remote_description(answer.clone())
            .await
            .map_err(SessionError::negotiation)?;
        self.session.set_remote_description(answer)?;
        advance(self.session, NegotiationState::AnswerReceived)?;
        info!(room = %self.session.room(), "answer received");
        self.complete()
    }

    /// A candidate the peer streamed outside its description
    pub async fn on_remote_candidate(&mut self, candidate: Candidate) -> Result<(), SessionError> {
        if !self.session.add_remote_candidate(candidate.clone())? {
            debug!("remote candidate already known or end of candidates");
            return Ok(());
        }
        if let Err(e) = self.transport.add_remote_candidate(candidate).await {
            warn!("transport rejected remote candidate: {}", e);
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<Option<String>, SessionError> {
        if !self.session.is_negotiated() {
            return Ok(None);
        }
        advance(self.session, NegotiationState::Connected)?;
        self.session.set_state(SessionState::Active);
        let fingerprint = match (
            self.session.local_description(),
            self.session.remote_description(),
        ) {
            (Some(local), Some(remote)) => session_fingerprint(local, remote),
            _ => None,
        };
        self.session.set_fingerprint(fingerprint.clone());
        info!(room = %self.session.room(), "negotiation complete");
        Ok(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockNetwork, RecordingSignaling};
    use crate::session::event_channel;

    #[test]
    fn transitions_follow_both_paths() {
        use NegotiationState::*;
        assert!(Idle.can_advance_to(Offering));
        assert!(Offering.can_advance_to(OfferSent));
        assert!(AnswerSent.can_advance_to(Connected));
        assert!(Connected.can_advance_to(Closed));
        assert!(!Idle.can_advance_to(Connected));
        assert!(!OfferSent.can_advance_to(AnswerSent));
        assert!(!Closed.can_advance_to(Offering));
    }

    #[tokio::test]
    async fn caller_invites_only_after_gathering_completes() {
        let network = MockNetwork::new();
        let (tx, _rx) = event_channel();
        let transport = network.transport(tx);
        let signaling = RecordingSignaling::default();
        let config = Config::default();
        let mut session = Session::new("r1");
        session.assign_role(Role::Caller).unwrap();

        let mut n = Negotiator::new(&mut session, &transport, &signaling, &config);
        n.start_offer().await.unwrap();
        n.on_local_candidate(Some(Candidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host")))
            .await
            .unwrap();
        assert!(signaling.sent().is_empty());

        n.on_local_candidate(None).await.unwrap();
        let sent = signaling.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SignalingMessage::Invite(offer) => assert!(offer.sdp.contains("a=candidate:")),
            other => panic!("expected invite, got {:?}", other),
        }
        assert_eq!(session.negotiation(), NegotiationState::OfferSent);
        assert!(session.local_description().is_some());
    }

    #[tokio::test]
    async fn gathering_timeout_sends_invite_once() {
        let network = MockNetwork::new();
        let (tx, _rx) = event_channel();
        let transport = network.transport(tx);
        let signaling = RecordingSignaling::default();
        let config = Config::default();
        let mut session = Session::new("r1");
        session.assign_role(Role::Caller).unwrap();

        let mut n = Negotiator::new(&mut session, &transport, &signaling, &config);
        n.start_offer().await.unwrap();
        n.on_gathering_timeout().await.unwrap();
        n.on_local_candidate(None).await.unwrap();
        n.on_gathering_timeout().await.unwrap();
        assert_eq!(signaling.sent().len(), 1);
    }

    #[tokio::test]
    async fn callee_answers_immediately() {
        let network = MockNetwork::new();
        let (tx, _rx) = event_channel();
        let transport = network.transport(tx);
        let signaling = RecordingSignaling::default();
        let config = Config::default();
        let mut session = Session::new("r1");

        let offer = SessionDescription::offer(
            "v=0\r\no=mock peer-a\r\na=fingerprint:sha-256 AA:BB\r\n",
        );
        let fingerprint = Negotiator::new(&mut session, &transport, &signaling, &config)
            .on_invite(offer)
            .await
            .unwrap();

        assert_eq!(session.role(), Some(Role::Callee));
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.negotiation(), NegotiationState::Connected);
        assert!(fingerprint.is_some());
        assert!(matches!(signaling.sent()[0], SignalingMessage::Ok(_)));
    }

    #[tokio::test]
    async fn second_invite_is_rejected() {
        let network = MockNetwork::new();
        let (tx, _rx) = event_channel();
        let transport = network.transport(tx);
        let signaling = RecordingSignaling::default();
        let config = Config::default();
        let mut session = Session::new("r1");
        let offer = SessionDescription::offer("v=0\r\no=mock peer-a\r\n");

        let mut n = Negotiator::new(&mut session, &transport, &signaling, &config);
        n.on_invite(offer.clone()).await.unwrap();
        let err = n.on_invite(offer).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(signaling.sent().len(), 1);
    }

    #[tokio::test]
    async fn stray_answer_is_invalid_state() {
        let network = MockNetwork::new();
        let (tx, _rx) = event_channel();
        let transport = network.transport(tx);
        let signaling = RecordingSignaling::default();
        let config = Config::default();
        let mut session = Session::new("r1");

        let err = Negotiator::new(&mut session, &transport, &signaling, &config)
            .on_answer(SessionDescription::answer("v=0"))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(session.remote_description().is_none());
    }

    #[tokio::test]
    async fn callee_streams_candidates_when_enabled() {
        let network = MockNetwork::new();
        let (tx, _rx) = event_channel();
        let transport = network.transport(tx);
        let signaling = RecordingSignaling::default();
        let config = Config {
            stream_callee_candidates: true,
            ..Config::default()
        };
        let mut session = Session::new("r1");
        let mut n = Negotiator::new(&mut session, &transport, &signaling, &config);
        n.on_invite(SessionDescription::offer("v=0\r\no=mock peer-a\r\n"))
            .await
            .unwrap();
        n.on_local_candidate(Some(Candidate::new("candidate:9 1 udp 1 10.0.0.9 5000 typ host")))
            .await
            .unwrap();
        n.on_local_candidate(None).await.unwrap();

        let sent = signaling.sent();
        assert_eq!(sent.len(), 3);
        match &sent[2] {
            SignalingMessage::IceCandidate(c) => assert!(c.is_terminal()),
            other => panic!("expected candidate, got {:?}", other),
        }
    }
}

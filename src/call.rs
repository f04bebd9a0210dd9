//! Session lifecycle: one [`Call`] per conversation
//!
//! Every input (relay messages, transport and data channel events, user
//! commands, timers) becomes a [`SessionEvent`] and goes through
//! [`Call::dispatch`], one at a time. Nothing else touches the session, so
//! handlers never race on descriptions or candidates.
//!
//! Teardown releases, in order: local media, the transport, the data
//! channel. Each is taken out of its slot before it is closed so a second
//! teardown finds nothing to release.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{self, MediaCapture};
use crate::channel::ChannelBootstrap;
use crate::config::Config;
use crate::error::{SessionError, TransportError};
use crate::negotiation::{NegotiationState, Negotiator};
use crate::peer::transport::{MediaTransport, TransportFactory};
use crate::peer::types::{ChannelEvent, ConnectionState, MediaSource, TransportEvent};
use crate::room::{self, RoomAction};
use crate::session::{
    event_channel, Command, EventRx, EventTx, Session, SessionEvent, SessionState, Timer,
};
use crate::signaling::{SignalingChannel, SignalingMessage};
use crate::sink::Sink;
use crate::utils::random_room;

/// Why a call is ending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    LocalHangUp,
    RemoteBye,
    Failure(SessionError),
}

impl Teardown {
    fn sends_bye(&self) -> bool {
        match self {
            Teardown::LocalHangUp => true,
            Teardown::RemoteBye => false,
            // The pair already in the room must not be disturbed
            Teardown::Failure(SessionError::RoomFull(_)) => false,
            Teardown::Failure(_) => true,
        }
    }
}

/// Cloneable remote control for a running [`Call`]
#[derive(Clone)]
pub struct CallHandle {
    events: EventTx,
    state: watch::Receiver<SessionState>,
}

impl CallHandle {
    /// Send a line of text to the peer. Queued until the channel opens.
    pub fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        if matches!(*self.state.borrow(), SessionState::Closing | SessionState::Closed) {
            return Err(SessionError::invalid_state("call has ended"));
        }
        self.events
            .send(SessionEvent::Command(Command::Send(text.into())))
            .map_err(|_| SessionError::invalid_state("call has ended"))
    }

    /// Hang up. Calling this on a finished call does nothing.
    pub fn hang_up(&self) {
        if self
            .events
            .send(SessionEvent::Command(Command::HangUp))
            .is_err()
        {
            debug!("hang up on a finished call");
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the call reaches `target` (or ends)
    pub async fn wait_for(&self, target: SessionState) -> SessionState {
        let mut rx = self.state.clone();
        let reached = match rx
            .wait_for(|s| *s == target || *s == SessionState::Closed)
            .await
        {
            Ok(state) => *state,
            Err(_) => SessionState::Closed,
        };
        reached
    }
}

pub struct Call {
    config: Config,
    session: Session,
    signaling: Arc<dyn SignalingChannel>,
    factory: Arc<dyn TransportFactory>,
    capture: Arc<dyn MediaCapture>,
    sink: Arc<dyn Sink>,
    transport: Option<Arc<dyn MediaTransport>>,
    local_media: Option<MediaSource>,
    remote_media: Option<MediaSource>,
    channel: ChannelBootstrap,
    events_tx: EventTx,
    events_rx: EventRx,
    state_tx: watch::Sender<SessionState>,
    timers: Vec<JoinHandle<()>>,
    connection: ConnectionState,
    grace_generation: u64,
    joined: bool,
    signaling_open: bool,
    failure: Option<SessionError>,
}

impl Call {
    pub fn new(
        config: Config,
        signaling: Arc<dyn SignalingChannel>,
        factory: Arc<dyn TransportFactory>,
        capture: Arc<dyn MediaCapture>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let room = config.room.clone().unwrap_or_else(random_room);
        let (events_tx, events_rx) = event_channel();
        let (state_tx, _) = watch::channel(SessionState::Created);
        Self {
            config,
            session: Session::new(room),
            signaling,
            factory,
            capture,
            sink,
            transport: None,
            local_media: None,
            remote_media: None,
            channel: ChannelBootstrap::new(),
            events_tx,
            events_rx,
            state_tx,
            timers: Vec::new(),
            connection: ConnectionState::New,
            grace_generation: 0,
            joined: false,
            signaling_open: true,
            failure: None,
        }
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            events: self.events_tx.clone(),
            state: self.state_tx.subscribe(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn room(&self) -> &str {
        self.session.room()
    }

    /// Why the call failed, if it did
    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    /// Run the call until it is closed.
    ///
    /// Returns the error that ended the call, or `Ok` after a hang-up on
    /// either side.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        if let Err(e) = self.start().await {
            error!("call setup failed: {}", e);
            self.teardown(Teardown::Failure(e)).await;
        }
        let signaling = Arc::clone(&self.signaling);
        while self.session.state() != SessionState::Closed {
            let event = tokio::select! {
                msg = signaling.recv(), if self.signaling_open => match msg {
                    Ok(msg) => SessionEvent::Signal(msg),
                    Err(e) => SessionEvent::SignalingLost(e),
                },
                ev = self.events_rx.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };
            self.dispatch(event).await;
        }
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        self.config.validate()?;
        info!(room = %self.session.room(), "starting call");

        let media = capture::acquire(self.capture.as_ref(), self.config.media).await?;
        let transport = self
            .factory
            .create_session(&self.config, self.events_tx.clone())
            .await?;
        self.transport = Some(Arc::clone(&transport));
        if let Some(source) = media {
            self.sink.show_local(&source);
            let attach = source.clone();
            self.local_media = Some(source);
            for track in &attach.tracks {
                transport.add_track(&attach, track).await?;
            }
        }

        self.signaling.join(self.session.room()).await?;
        self.joined = true;
        if let Some(after) = self.config.peer_wait_timeout() {
            self.arm_timer(Timer::PeerWaitTimeout, after);
        }
        self.publish_state();
        Ok(())
    }

    /// Single entry point for everything that happens to the session
    pub async fn dispatch(&mut self, event: SessionEvent) {
        if self.session.state() == SessionState::Closed {
            debug!("call closed, dropping {:?}", event);
            return;
        }
        let result = match event {
            SessionEvent::Signal(msg) => self.on_signal(msg).await,
            SessionEvent::SignalingLost(e) => {
                warn!("signaling connection lost: {}", e);
                self.signaling_open = false;
                Err(e.into())
            }
            SessionEvent::Transport(ev) => self.on_transport(ev).await,
            SessionEvent::Channel(ev) => self.on_channel(ev).await,
            SessionEvent::Command(Command::Send(text)) => self.send(&text).await,
            SessionEvent::Command(Command::HangUp) => {
                self.hang_up().await;
                Ok(())
            }
            SessionEvent::Timer(timer) => self.on_timer(timer).await,
        };
        if let Err(e) = result {
            self.fail(e).await;
        }
        self.publish_state();
    }

    async fn fail(&mut self, err: SessionError) {
        if !err.is_fatal() {
            warn!("discarding: {}", err);
            return;
        }
        error!("call failed: {}", err);
        self.sink.line(&format!("*** Error: {} ***", err));
        self.teardown(Teardown::Failure(err)).await;
    }

    fn transport(&self) -> Result<Arc<dyn MediaTransport>, SessionError> {
        self.transport
            .clone()
            .ok_or_else(|| SessionError::invalid_state("no media transport"))
    }

    async fn on_signal(&mut self, msg: SignalingMessage) -> Result<(), SessionError> {
        debug!(event = msg.event_name(), "signaling message");
        match msg {
            SignalingMessage::Created(_)
            | SignalingMessage::Joined(_)
            | SignalingMessage::Full(_)
            | SignalingMessage::NewPeer(_) => {
                match room::on_membership(&mut self.session, &msg)? {
                    RoomAction::Wait => Ok(()),
                    RoomAction::BecomeCaller => self.begin_caller().await,
                }
            }
            SignalingMessage::Invite(offer) => {
                let transport = self.transport()?;
                let fingerprint = Negotiator::new(
                    &mut self.session,
                    transport.as_ref(),
                    self.signaling.as_ref(),
                    &self.config,
                )
                .on_invite(offer)
                .await?;
                self.show_fingerprint(fingerprint);
                Ok(())
            }
            SignalingMessage::Ok(answer) => {
                let transport = self.transport()?;
                let fingerprint = Negotiator::new(
                    &mut self.session,
                    transport.as_ref(),
                    self.signaling.as_ref(),
                    &self.config,
                )
                .on_answer(answer)
                .await?;
                self.show_fingerprint(fingerprint);
                Ok(())
            }
            SignalingMessage::IceCandidate(candidate) => {
                let transport = self.transport()?;
                Negotiator::new(
                    &mut self.session,
                    transport.as_ref(),
                    self.signaling.as_ref(),
                    &self.config,
                )
                .on_remote_candidate(candidate)
                .await
            }
            SignalingMessage::Bye(room) => {
                if !room.is_empty() && room != self.session.room() {
                    return Err(SessionError::invalid_state(format!(
                        "bye for room {} but session is in {}",
                        room,
                        self.session.room()
                    )));
                }
                info!(room = %self.session.room(), "peer hung up");
                self.teardown(Teardown::RemoteBye).await;
                Ok(())
            }
        }
    }

    async fn begin_caller(&mut self) -> Result<(), SessionError> {
        let transport = self.transport()?;
        self.session.set_state(SessionState::Negotiating);
        // The channel has to exist before the offer is generated
        let dc = transport
            .create_data_channel(&self.config.channel_label)
            .await?;
        self.channel.created(&mut self.session, dc)?;
        Negotiator::new(
            &mut self.session,
            transport.as_ref(),
            self.signaling.as_ref(),
            &self.config,
        )
        .start_offer()
        .await?;
        self.arm_timer(Timer::GatheringTimeout, self.config.gather_timeout());
        Ok(())
    }

    fn show_fingerprint(&self, fingerprint: Option<String>) {
        if let Some(fp) = fingerprint {
            info!(fingerprint = %fp, "session fingerprint");
            self.sink
                .line(&format!("*** Session fingerprint: {} ***", fp));
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let transport = self.transport()?;
                Negotiator::new(
                    &mut self.session,
                    transport.as_ref(),
                    self.signaling.as_ref(),
                    &self.config,
                )
                .on_local_candidate(candidate)
                .await
            }
            TransportEvent::RemoteTrack(source) => {
                self.add_remote_media(source);
                Ok(())
            }
            TransportEvent::RemoteDataChannel(dc) => self.channel.received(&mut self.session, dc),
            TransportEvent::ConnectionState(state) => self.on_connection_state(state),
        }
    }

    fn add_remote_media(&mut self, source: MediaSource) {
        match &mut self.remote_media {
            Some(current) if current.id == source.id => {
                current.tracks.extend(source.tracks);
                self.sink.show_remote(current);
            }
            _ => {
                self.sink.show_remote(&source);
                if let Some(old) = self.remote_media.replace(source) {
                    old.stop_all();
                }
            }
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) -> Result<(), SessionError> {
        self.connection = state;
        match state {
            ConnectionState::Connected => {
                // Any pending grace timer is now stale
                self.grace_generation += 1;
                Ok(())
            }
            ConnectionState::Disconnected => {
                self.grace_generation += 1;
                let grace = self.config.disconnect_grace();
                warn!("peer connection disconnected, waiting {:?}", grace);
                self.arm_timer(Timer::DisconnectGrace(self.grace_generation), grace);
                Ok(())
            }
            ConnectionState::Failed => Err(SessionError::Transport(
                TransportError::ConnectionFailed("peer connection failed".into()),
            )),
            _ => Ok(()),
        }
    }

    async fn on_channel(&mut self, event: ChannelEvent) -> Result<(), SessionError> {
        match event {
            ChannelEvent::Open => self.channel.on_open(&mut self.session).await,
            ChannelEvent::Message(text) => {
                self.channel
                    .on_message(&self.session, &text, self.sink.as_ref());
                Ok(())
            }
            ChannelEvent::Closed => {
                self.channel.on_closed(&mut self.session);
                Ok(())
            }
        }
    }

    async fn on_timer(&mut self, timer: Timer) -> Result<(), SessionError> {
        match timer {
            Timer::GatheringTimeout => {
                let transport = self.transport()?;
                Negotiator::new(
                    &mut self.session,
                    transport.as_ref(),
                    self.signaling.as_ref(),
                    &self.config,
                )
                .on_gathering_timeout()
                .await
            }
            Timer::PeerWaitTimeout => {
                if self.session.state() != SessionState::Created {
                    return Ok(());
                }
                Err(SessionError::Timeout(format!(
                    "no peer joined room {}",
                    self.session.room()
                )))
            }
            Timer::DisconnectGrace(generation) => {
                if generation != self.grace_generation
                    || self.connection == ConnectionState::Connected
                {
                    return Ok(());
                }
                Err(SessionError::Transport(TransportError::Disconnected))
            }
        }
    }

    fn arm_timer(&mut self, timer: Timer, after: Duration) {
        let events = self.events_tx.clone();
        self.timers.retain(|t| !t.is_finished());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(SessionEvent::Timer(timer));
        }));
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.session.state());
    }

    /// Send text to the peer; queued while the channel is not open yet
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        self.channel
            .send(&self.session, text, self.sink.as_ref())
            .await
    }

    /// Hang up locally. A no-op once the call is closing or closed.
    pub async fn hang_up(&mut self) {
        self.teardown(Teardown::LocalHangUp).await;
        self.publish_state();
    }

    /// Release everything the session owns, exactly once
    pub async fn teardown(&mut self, cause: Teardown) {
        if self.session.is_closed() {
            debug!(?cause, "teardown already done");
            return;
        }
        info!(room = %self.session.room(), ?cause, "closing call");
        self.session.set_state(SessionState::Closing);
        self.publish_state();
        for timer in self.timers.drain(..) {
            timer.abort();
        }

        if cause.sends_bye() && self.joined && self.signaling_open {
            let bye = SignalingMessage::Bye(self.session.room().to_string());
            if let Err(e) = self.signaling.send(bye).await {
                warn!("could not send bye: {}", e);
            }
        }

        self.release_media();
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        let unsent = self
            .channel
            .release(&mut self.session, self.sink.as_ref())
            .await;
        if unsent > 0 {
            self.sink
                .line(&format!("*** {} message(s) not delivered ***", unsent));
        }

        self.session.set_negotiation(NegotiationState::Closed);
        self.session.set_state(SessionState::Closed);
        if self.signaling_open {
            self.signaling_open = false;
            self.signaling.close().await;
        }
        if let Teardown::Failure(e) = cause {
            self.failure = Some(e);
        }
        self.publish_state();
        info!(room = %self.session.room(), "call closed");
    }

    fn release_media(&mut self) {
        let local = self.local_media.take();
        let remote = self.remote_media.take();
        if local.is_none() && remote.is_none() {
            return;
        }
        let stopped: usize = local
            .iter()
            .chain(remote.iter())
            .map(MediaSource::stop_all)
            .sum();
        debug!(stopped, "media tracks stopped");
        self.sink.clear_media();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConstraints;
    use crate::mock::{
        MockCapture, MockNetwork, MockTransportFactory, RecordingSignaling, RecordingSink,
    };
    use crate::peer::types::{Candidate, SessionDescription};

    struct Fixture {
        call: Call,
        signaling: Arc<RecordingSignaling>,
        factory: Arc<MockTransportFactory>,
        sink: Arc<RecordingSink>,
    }

    fn fixture(config: Config) -> Fixture {
        let signaling = Arc::new(RecordingSignaling::default());
        let factory = Arc::new(MockTransportFactory::new(MockNetwork::new()));
        let sink = Arc::new(RecordingSink::default());
        let call = Call::new(
            config,
            signaling.clone(),
            factory.clone(),
            Arc::new(MockCapture::default()),
            sink.clone(),
        );
        Fixture {
            call,
            signaling,
            factory,
            sink,
        }
    }

    fn config() -> Config {
        Config {
            room: Some("r1".into()),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn start_attaches_media_and_joins() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        assert_eq!(f.signaling.joined(), vec!["r1".to_string()]);
        let transport = &f.factory.created()[0];
        assert_eq!(transport.track_ids().len(), 2);
        assert_eq!(f.sink.local_media().len(), 1);
    }

    #[tokio::test]
    async fn random_room_when_none_configured() {
        let f = fixture(Config::default());
        assert!(f.call.room().starts_with("room-"));
    }

    #[tokio::test]
    async fn double_hang_up_releases_once() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call.hang_up().await;
        f.call.hang_up().await;

        assert_eq!(f.call.session().state(), SessionState::Closed);
        assert_eq!(f.factory.created()[0].close_count(), 1);
        assert_eq!(f.sink.clear_count(), 1);
        assert_eq!(f.sink.count(crate::channel::CLOSED_NOTICE), 1);
        let byes = f
            .signaling
            .sent()
            .into_iter()
            .filter(|m| matches!(m, SignalingMessage::Bye(_)))
            .count();
        assert_eq!(byes, 1);
    }

    #[tokio::test]
    async fn remote_bye_after_hang_up_is_a_no_op() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call.hang_up().await;
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Bye("r1".into())))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Closed);
        assert_eq!(f.factory.created()[0].close_count(), 1);
        assert!(f.call.failure().is_none());
    }

    #[tokio::test]
    async fn bye_for_another_room_is_ignored() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Bye("r2".into())))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Created);
    }

    #[tokio::test]
    async fn stray_candidate_does_not_end_the_call() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::IceCandidate(
                Candidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"),
            )))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Created);
        assert!(f.call.session().remote_candidates().is_empty());
    }

    #[tokio::test]
    async fn full_room_closes_without_bye() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Full("r1".into())))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Closed);
        assert_eq!(f.call.failure(), Some(&SessionError::RoomFull("r1".into())));
        assert!(f.signaling.sent().is_empty());
    }

    #[tokio::test]
    async fn caller_creates_channel_before_offer() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Created("r1".into())))
            .await;
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::NewPeer("r1".into())))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Negotiating);
        assert_eq!(f.call.session().negotiation(), NegotiationState::Offering);
        assert!(f.call.channel.has_channel());

        // gathered candidates and the end-of-gathering marker are queued
        while let Ok(ev) = f.call.events_rx.try_recv() {
            f.call.dispatch(ev).await;
        }
        let sent = f.signaling.sent();
        match &sent[0] {
            SignalingMessage::Invite(offer) => {
                assert!(offer.sdp.contains("a=channel:chat"));
                assert_eq!(offer.embedded_candidates().len(), 2);
            }
            other => panic!("expected invite, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_connection_tears_down() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Transport(TransportEvent::ConnectionState(
                ConnectionState::Failed,
            )))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Closed);
        assert!(matches!(f.call.failure(), Some(SessionError::Transport(_))));
    }

    #[tokio::test]
    async fn reconnect_within_grace_keeps_the_call() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Transport(TransportEvent::ConnectionState(
                ConnectionState::Disconnected,
            )))
            .await;
        let stale = f.call.grace_generation;
        f.call
            .dispatch(SessionEvent::Transport(TransportEvent::ConnectionState(
                ConnectionState::Connected,
            )))
            .await;
        f.call
            .dispatch(SessionEvent::Timer(Timer::DisconnectGrace(stale)))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Created);

        f.call
            .dispatch(SessionEvent::Transport(TransportEvent::ConnectionState(
                ConnectionState::Disconnected,
            )))
            .await;
        let current = f.call.grace_generation;
        f.call
            .dispatch(SessionEvent::Timer(Timer::DisconnectGrace(current)))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn capture_failure_ends_the_call_before_joining() {
        let signaling = Arc::new(RecordingSignaling::default());
        let mut call = Call::new(
            config(),
            signaling.clone(),
            Arc::new(MockTransportFactory::new(MockNetwork::new())),
            Arc::new(MockCapture {
                camera_fails: true,
                screen_fails: true,
            }),
            Arc::new(RecordingSink::default()),
        );
        let err = call.run().await.unwrap_err();
        assert!(matches!(err, SessionError::CapabilityUnavailable(_)));
        assert!(signaling.joined().is_empty());
        assert!(signaling.sent().is_empty());
    }

    #[tokio::test]
    async fn media_free_call_skips_capture() {
        let mut f = fixture(Config {
            media: MediaConstraints::none(),
            ..config()
        });
        f.call.start().await.unwrap();
        assert!(f.factory.created()[0].track_ids().is_empty());
        f.call.hang_up().await;
        assert_eq!(f.sink.clear_count(), 0);
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call.send("queued").await.unwrap();
        f.call.hang_up().await;
        assert!(f.sink.contains("1 message(s) not delivered"));
        let err = f.call.send("too late").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
    }

    #[tokio::test]
    async fn peer_wait_timeout_sends_bye() {
        let mut f = fixture(Config {
            peer_wait_timeout_ms: Some(50),
            ..config()
        });
        let handle = f.call.handle();
        let err = f.call.run().await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(
            f.signaling.sent(),
            vec![SignalingMessage::Bye("r1".into())]
        );
    }

    #[tokio::test]
    async fn callee_accepts_invite() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Joined("r1".into())))
            .await;
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Invite(
                SessionDescription::offer("v=0\r\no=mock caller\r\na=fingerprint:sha-256 AA\r\n"),
            )))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Active);
        assert!(f.sink.contains("Session fingerprint"));
        assert!(matches!(f.signaling.sent()[0], SignalingMessage::Ok(_)));
    }

    #[tokio::test]
    async fn malformed_invite_tears_down_once() {
        let mut f = fixture(config());
        f.call.start().await.unwrap();
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Joined("r1".into())))
            .await;
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Invite(
                SessionDescription::offer("v=0\r\nnot a description\r\n"),
            )))
            .await;
        assert_eq!(f.call.session().state(), SessionState::Closed);
        assert!(matches!(
            f.call.failure(),
            Some(SessionError::NegotiationFailure(_))
        ));
        assert_eq!(f.signaling.sent(), vec![SignalingMessage::Bye("r1".into())]);

        // Late events after the failure change nothing
        f.call
            .dispatch(SessionEvent::Signal(SignalingMessage::Bye("r1".into())))
            .await;
        f.call.hang_up().await;
        assert_eq!(f.factory.created()[0].close_count(), 1);
        assert_eq!(f.sink.count(crate::channel::CLOSED_NOTICE), 1);
        assert_eq!(f.signaling.sent().len(), 1);
    }

    #[tokio::test]
    async fn transport_creation_failure_ends_the_call_before_joining() {
        let signaling = Arc::new(RecordingSignaling::default());
        let mut factory = MockTransportFactory::new(MockNetwork::new());
        factory.fail = true;
        let mut call = Call::new(
            config(),
            signaling.clone(),
            Arc::new(factory),
            Arc::new(MockCapture::default()),
            Arc::new(RecordingSink::default()),
        );
        let handle = call.handle();
        let err = call.run().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(TransportError::ConnectionFailed(_))
        ));
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(signaling.joined().is_empty());
        assert!(signaling.sent().is_empty());
    }

    #[tokio::test]
    async fn handle_waits_for_state_or_close() {
        let mut f = fixture(config());
        let handle = f.call.handle();
        f.call.start().await.unwrap();
        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.wait_for(SessionState::Active).await }
        });
        f.call.hang_up().await;
        assert_eq!(waiter.await.unwrap(), SessionState::Closed);
        assert_eq!(handle.wait_for(SessionState::Created).await, SessionState::Closed);
    }
}

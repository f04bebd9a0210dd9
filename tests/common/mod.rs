//! Shared helpers for the call integration tests
//!
//! Each endpoint is a real [`Call`] running on its own task, talking to a
//! shared in-memory [`RoomHub`] and linked to its peer through a
//! [`MockNetwork`].

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use roomcall_lib::mock::{MockCapture, MockNetwork, MockTransportFactory, RecordingSink};
use roomcall_lib::relay::{MemoryRelay, RoomHub};
use roomcall_lib::signaling::SignalingChannel;
use roomcall_lib::{Call, CallHandle, Config, SessionError, SessionState};

pub const ROOM: &str = "r1";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn config() -> Config {
    Config {
        room: Some(ROOM.into()),
        ..Config::default()
    }
}

pub struct Endpoint {
    pub handle: CallHandle,
    pub sink: Arc<RecordingSink>,
    pub factory: Arc<MockTransportFactory>,
    pub relay: Arc<MemoryRelay>,
    pub task: JoinHandle<(Call, Result<(), SessionError>)>,
}

impl Endpoint {
    /// Wait for the call loop to finish and hand back the call
    pub async fn finish(self) -> (Call, Result<(), SessionError>) {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("call did not finish in time")
            .expect("call task panicked")
    }

    pub async fn reach(&self, state: SessionState) {
        let reached = tokio::time::timeout(WAIT, self.handle.wait_for(state))
            .await
            .expect("timed out waiting for state");
        assert_eq!(reached, state);
    }
}

pub fn spawn_endpoint(hub: &Arc<RoomHub>, network: &Arc<MockNetwork>, config: Config) -> Endpoint {
    spawn_endpoint_with(hub, network, config, MockCapture::default())
}

pub fn spawn_endpoint_with(
    hub: &Arc<RoomHub>,
    network: &Arc<MockNetwork>,
    config: Config,
    capture: MockCapture,
) -> Endpoint {
    let relay = Arc::new(hub.connect());
    let factory = Arc::new(MockTransportFactory::new(Arc::clone(network)));
    let sink = Arc::new(RecordingSink::default());
    let signaling: Arc<dyn SignalingChannel> = relay.clone();
    let mut call = Call::new(
        config,
        signaling,
        factory.clone(),
        Arc::new(capture),
        sink.clone(),
    );
    let handle = call.handle();
    let task = tokio::spawn(async move {
        let result = call.run().await;
        (call, result)
    });
    Endpoint {
        handle,
        sink,
        factory,
        relay,
        task,
    }
}

/// Poll `cond` until it holds or the test deadline passes
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Start A, wait until the relay has it in the room, then start B
pub async fn connected_pair(
    hub: &Arc<RoomHub>,
    network: &Arc<MockNetwork>,
    a_config: Config,
    b_config: Config,
) -> (Endpoint, Endpoint) {
    let a = spawn_endpoint(hub, network, a_config);
    eventually("A in room", || hub.room_members(ROOM).len() == 1).await;
    let b = spawn_endpoint(hub, network, b_config);
    (a, b)
}

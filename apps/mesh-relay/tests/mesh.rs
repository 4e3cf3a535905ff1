//! Engines meeting through a live relay, mostly with in-memory links standing in for WebRTC.

mod support;

use std::sync::Arc;

use parking_lot::Mutex;
use peer_mesh::link::mock::MockLinkFactory;
use peer_mesh::{LinkConfig, MeshEngine, PeerId, Role, SdpKind, SessionState};

use support::{eventually, spawn_relay, within};

struct Participant {
    engine: MeshEngine,
    factory: MockLinkFactory,
    ready: Arc<Mutex<Vec<bool>>>,
    inbox: Arc<Mutex<Vec<(PeerId, String)>>>,
}

impl Participant {
    async fn join(url: &str) -> Self {
        let factory = MockLinkFactory::new();
        let engine = MeshEngine::with_link_factory(Arc::new(factory.clone()));
        let ready = Arc::new(Mutex::new(Vec::new()));
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ready);
        engine.register_ready_change_handler(move |state| sink.lock().push(state));
        let sink = Arc::clone(&inbox);
        engine.register_message_handler(move |peer, text| {
            sink.lock().push((peer.clone(), text.to_string()))
        });
        engine.initialize(url, LinkConfig::localhost()).unwrap();
        engine.start().await.unwrap();
        eventually("welcome", || engine.self_id().is_some()).await;
        Self {
            engine,
            factory,
            ready,
            inbox,
        }
    }

    fn id(&self) -> PeerId {
        self.engine.self_id().unwrap()
    }

    fn remote_kinds(&self, peer: &str) -> Vec<SdpKind> {
        self.factory
            .link(peer)
            .map(|link| {
                link.snapshot()
                    .remote_descriptions
                    .iter()
                    .map(|d| d.kind)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[tokio::test]
async fn engines_negotiate_exchange_messages_and_part() {
    let url = spawn_relay().await;
    let first = Participant::join(&url).await;
    let second = Participant::join(&url).await;
    let (first_id, second_id) = (first.id(), second.id());

    // The later arrival offers; the earlier one answers.
    eventually("offer applied by first", || {
        first.remote_kinds(&second_id) == vec![SdpKind::Offer]
    })
    .await;
    eventually("answer applied by second", || {
        second.remote_kinds(&first_id) == vec![SdpKind::Answer]
    })
    .await;

    let first_view = first.engine.manager().unwrap().snapshot().await.unwrap();
    assert_eq!(first_view.peer(&second_id).unwrap().role, Role::Answerer);
    let second_view = second.engine.manager().unwrap().snapshot().await.unwrap();
    assert_eq!(second_view.peer(&first_id).unwrap().role, Role::Offerer);

    let offered = first.factory.link(&second_id).unwrap().snapshot();
    assert_eq!(
        offered.remote_descriptions[0].sdp,
        format!("mock-offer-{first_id}")
    );

    assert_eq!(first.engine.send("too early").await, 0);

    first.factory.link(&second_id).unwrap().open_channel();
    second.factory.link(&first_id).unwrap().open_channel();
    eventually("both ready", || {
        first.engine.is_ready() && second.engine.is_ready()
    })
    .await;

    assert_eq!(first.engine.send("hello").await, 1);
    assert_eq!(
        first.factory.link(&second_id).unwrap().sent(),
        vec!["hello".to_string()]
    );
    second.factory.link(&first_id).unwrap().deliver("hello");
    eventually("message delivered", || !second.inbox.lock().is_empty()).await;
    assert_eq!(
        second.inbox.lock().clone(),
        vec![(first_id.clone(), "hello".to_string())]
    );

    within("second stops", second.engine.stop()).await;
    eventually("first sees departure", || !first.engine.is_ready()).await;
    assert_eq!(first.ready.lock().clone(), vec![true, false]);
    assert_eq!(second.ready.lock().clone(), vec![true, false]);
    let first_view = first.engine.manager().unwrap().snapshot().await.unwrap();
    assert!(first_view.peer(&second_id).is_none());
    assert_eq!(first_view.ready_count, 0);

    within("first stops", first.engine.stop()).await;
    first.engine.stop().await;
    assert!(first.engine.manager().is_none());
}

#[tokio::test]
async fn late_joiner_offers_to_everyone_already_present() {
    let url = spawn_relay().await;
    let a = Participant::join(&url).await;
    let b = Participant::join(&url).await;
    let c = Participant::join(&url).await;
    let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());

    eventually("c offers to a and b", || {
        a.remote_kinds(&c_id) == vec![SdpKind::Offer] && b.remote_kinds(&c_id) == vec![SdpKind::Offer]
    })
    .await;

    let c_view = c.engine.manager().unwrap().snapshot().await.unwrap();
    assert_eq!(c_view.peers.len(), 2);
    assert!(c_view.peers.iter().all(|p| p.role == Role::Offerer));
    assert!(c_view
        .peers
        .iter()
        .all(|p| p.state == SessionState::Negotiating));
    assert!(c_view.peer(&a_id).is_some() && c_view.peer(&b_id).is_some());

    // a never offers to anyone: both of its peers arrived after it.
    let a_view = a.engine.manager().unwrap().snapshot().await.unwrap();
    assert!(a_view.peers.iter().all(|p| p.role == Role::Answerer));

    for participant in [&a, &b, &c] {
        participant.engine.stop().await;
    }
}

#[tokio::test]
async fn engine_restarts_with_a_new_identity() {
    let url = spawn_relay().await;
    let engine = MeshEngine::with_link_factory(Arc::new(MockLinkFactory::new()));
    engine.initialize(&url, LinkConfig::localhost()).unwrap();
    engine.start().await.unwrap();
    assert!(engine.start().await.is_err());
    eventually("first welcome", || engine.self_id().is_some()).await;
    let first_id = engine.self_id().unwrap();

    engine.stop().await;
    assert!(engine.self_id().is_none());
    engine.start().await.unwrap();
    eventually("second welcome", || engine.self_id().is_some()).await;
    assert_ne!(engine.self_id().unwrap(), first_id);
    engine.stop().await;
}

#[tokio::test]
async fn webrtc_engines_connect_over_loopback() {
    let url = spawn_relay().await;
    let mut sides = Vec::new();
    for _ in 0..2 {
        let engine = MeshEngine::new();
        let ready = Arc::new(Mutex::new(Vec::new()));
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ready);
        engine.register_ready_change_handler(move |state| sink.lock().push(state));
        let sink = Arc::clone(&inbox);
        engine.register_message_handler(move |peer: &PeerId, text: &str| {
            sink.lock().push((peer.clone(), text.to_string()))
        });
        engine.initialize(&url, LinkConfig::localhost()).unwrap();
        engine.start().await.unwrap();
        eventually("welcome", || engine.self_id().is_some()).await;
        sides.push((engine, ready, inbox));
    }
    let (a, a_ready, a_inbox) = &sides[0];
    let (b, b_ready, b_inbox) = &sides[1];
    let (a_id, b_id) = (a.self_id().unwrap(), b.self_id().unwrap());

    eventually("data channels open", || a.is_ready() && b.is_ready()).await;
    let a_view = a.manager().unwrap().snapshot().await.unwrap();
    assert_eq!(a_view.peer(&b_id).unwrap().state, SessionState::LinkOpen);
    assert_eq!(a_view.peer(&b_id).unwrap().role, Role::Answerer);

    assert_eq!(a.send("ping").await, 1);
    assert_eq!(b.send("pong").await, 1);
    eventually("both messages arrive", || {
        !a_inbox.lock().is_empty() && !b_inbox.lock().is_empty()
    })
    .await;
    assert_eq!(a_inbox.lock().clone(), vec![(b_id.clone(), "pong".to_string())]);
    assert_eq!(b_inbox.lock().clone(), vec![(a_id.clone(), "ping".to_string())]);

    within("b stops", b.stop()).await;
    eventually("a loses its only peer", || !a.is_ready()).await;
    assert_eq!(a_ready.lock().clone(), vec![true, false]);
    assert_eq!(b_ready.lock().clone(), vec![true, false]);
    assert_eq!(a.send("anyone?").await, 0);

    within("a stops", a.stop()).await;
}

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;

use campmesh_core::{
    Clock, EngineConfig, EngineEvent, EmergencyState, LoopbackMesh, ManualClock, MeshEngine,
};
use campmesh_shared::{
    AnnouncementPriority, Conversation, DeliveryStatus, MemberId, MessageKind, Role, SenderInfo,
};

async fn node(mesh: &LoopbackMesh, id: &str, role: Role, clock: &ManualClock) -> MeshEngine {
    node_with(mesh, EngineConfig::new(SenderInfo::new(id, id.to_uppercase(), role)), clock).await
}

async fn node_with(mesh: &LoopbackMesh, config: EngineConfig, clock: &ManualClock) -> MeshEngine {
    let (handle, notifications) = mesh.join(config.local.id.clone());
    MeshEngine::builder(config)
        .clock(clock.clone())
        .spawn(handle, notifications)
        .await
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn text_is_delivered_once_acknowledged() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;

    let sent = alice.send_text(Conversation::Camp, "water at the bus").await.unwrap();
    assert_eq!(sent.delivery_status, DeliveryStatus::Queued);
    settle().await;

    assert_eq!(alice.delivery_status(&sent.id).await, Some(DeliveryStatus::Delivered));
    let received = bob.messages(&Conversation::Camp).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, sent.id);
    assert_eq!(received[0].from, MemberId::new("alice"));
    assert!(bob.is_online(&MemberId::new("alice")).await);
}

#[tokio::test(start_paused = true)]
async fn direct_message_reaches_only_its_peer() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;
    let carol = node(&mesh, "carol", Role::General, &clock).await;

    let dm = alice
        .send_text(Conversation::Direct(MemberId::new("bob")), "meet at medic tent")
        .await
        .unwrap();
    settle().await;

    assert_eq!(alice.delivery_status(&dm.id).await, Some(DeliveryStatus::Delivered));
    let thread = bob.messages(&Conversation::Direct(MemberId::new("alice"))).await;
    assert_eq!(thread.len(), 1);
    assert!(carol.conversations().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_message_fails_after_timeout() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    // A radio that hears frames but never runs an engine.
    let (_silent, _silent_rx) = mesh.join(MemberId::new("silent"));

    let sent = alice.send_text(Conversation::Camp, "anyone?").await.unwrap();
    settle().await;
    assert_eq!(alice.delivery_status(&sent.id).await, Some(DeliveryStatus::Sent));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(alice.delivery_status(&sent.id).await, Some(DeliveryStatus::Failed));
}

#[tokio::test(start_paused = true)]
async fn sos_while_offline_shows_locally_and_is_delivered_later() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;
    mesh.set_online(&MemberId::new("alice"), false);

    let sos = alice.send_sos(None).await.unwrap();
    assert_eq!(alice.emergency_state().await, EmergencyState::Active);

    // Well past the ordinary attempt ceiling.
    tokio::time::sleep(Duration::from_secs(300)).await;
    let pending = alice.message(&sos.id).await.unwrap();
    assert_eq!(pending.delivery_status, DeliveryStatus::Queued);
    assert!(pending.attempts > 5);
    assert_eq!(alice.active_emergency().await.unwrap().id, sos.id);
    assert_eq!(bob.emergency_state().await, EmergencyState::Idle);

    mesh.set_online(&MemberId::new("alice"), true);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(alice.delivery_status(&sos.id).await, Some(DeliveryStatus::Delivered));
    assert_eq!(alice.active_emergency().await.unwrap().id, sos.id);
    let shown = bob.active_emergency().await.unwrap();
    assert_eq!(shown.id, sos.id);
    assert_eq!(shown.originator_id, MemberId::new("alice"));
}

#[tokio::test(start_paused = true)]
async fn later_emergency_takes_the_slot() {
    let start = Utc::now();
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &ManualClock::new(start)).await;
    let bob = node(&mesh, "bob", Role::General, &ManualClock::new(start)).await;
    let carol = node(
        &mesh,
        "carol",
        Role::General,
        &ManualClock::new(start + ChronoDuration::seconds(5)),
    )
    .await;

    let mut events = alice.subscribe();
    // Carol's is later by timestamp even though it is raised first.
    carol.send_sos(None).await.unwrap();
    settle().await;
    bob.send_sos(None).await.unwrap();
    settle().await;

    let active = alice.active_emergency().await.unwrap();
    assert_eq!(active.originator_id, MemberId::new("carol"));
    assert_eq!(bob.active_emergency().await.unwrap().originator_id, MemberId::new("bob"));

    let activations = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::EmergencyActive(_)))
        .count();
    assert_eq!(activations, 1);

    // Acknowledging clears the display but not the message.
    let acked = alice.acknowledge_emergency().await.unwrap();
    assert_eq!(alice.emergency_state().await, EmergencyState::Idle);
    assert!(alice.message(&acked.id).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn lead_all_clear_resets_peers() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let lead = node(&mesh, "lead", Role::Lead, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;

    bob.send_sos(None).await.unwrap();
    settle().await;
    assert_eq!(lead.emergency_state().await, EmergencyState::Active);

    assert!(bob.resolve_emergency().await.is_err());

    let clear = lead.resolve_emergency().await.unwrap();
    assert!(clear.is_some());
    settle().await;
    assert_eq!(lead.emergency_state().await, EmergencyState::Idle);
    assert_eq!(bob.emergency_state().await, EmergencyState::Idle);
}

#[tokio::test(start_paused = true)]
async fn announcement_expires_and_collects_readers() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let lead = node(&mesh, "lead", Role::Lead, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;
    let carol = node(&mesh, "carol", Role::General, &clock).await;
    let mut bob_events = bob.subscribe();

    let notice = lead
        .send_announcement(
            "Dust storm",
            "Goggles on, stay near camp",
            AnnouncementPriority::Urgent,
            Some(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    settle().await;

    clock.advance(ChronoDuration::seconds(3599));
    let active = carol.active_announcements().await;
    assert_eq!(active.len(), 1);
    assert!(!active[0].is_read_by(&MemberId::new("carol")));
    assert_eq!(carol.unread_announcement_count().await, 1);

    bob.mark_as_read(&notice.id).await.unwrap();
    bob.mark_as_read(&notice.id).await.unwrap();
    settle().await;
    let on_lead = lead.announcement(&notice.id).await.unwrap();
    assert!(on_lead.is_read_by(&MemberId::new("bob")));
    assert_eq!(on_lead.read_by.len(), 1);
    assert!(carol
        .announcement(&notice.id)
        .await
        .unwrap()
        .is_read_by(&MemberId::new("bob")));

    // Dismissing hides the banner without reading.
    assert_eq!(carol.dismiss_latest_announcement().await, Some(notice.id));
    assert!(carol.latest_announcement().await.is_none());
    assert_eq!(carol.unread_announcement_count().await, 1);

    clock.advance(ChronoDuration::seconds(2));
    assert!(carol.active_announcements().await.is_empty());
    assert!(lead.active_announcements().await.is_empty());

    bob.tick().await;
    let events = drain(&mut bob_events);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::AnnouncementReceived { id, .. } if *id == notice.id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::AnnouncementExpired { id } if *id == notice.id)));
}

#[tokio::test(start_paused = true)]
async fn peer_check_ins_drive_overdue_set() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::Lead, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;
    let mut events = alice.subscribe();
    let bob_id = MemberId::new("bob");

    let check_in = bob.check_in().await.unwrap();
    assert_eq!(check_in.kind(), MessageKind::CheckIn);
    settle().await;
    assert_eq!(
        alice.next_check_in_due(&bob_id).await,
        Some(clock.now() + ChronoDuration::hours(4))
    );

    clock.advance(ChronoDuration::hours(5));
    assert!(alice.overdue_members().await.contains(&bob_id));
    alice.set_check_in_interval(Duration::from_secs(8 * 3600)).await.unwrap();
    assert!(!alice.overdue_members().await.contains(&bob_id));
    alice.set_check_in_interval(Duration::from_secs(4 * 3600)).await.unwrap();

    alice.tick().await;
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::OverdueCheckIn { member } if *member == bob_id)));

    bob.check_in().await.unwrap();
    settle().await;
    assert!(!alice.overdue_members().await.contains(&bob_id));
}

#[tokio::test(start_paused = true)]
async fn presence_follows_silence() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;
    let bob_id = MemberId::new("bob");
    let mut events = alice.subscribe();

    bob.send_text(Conversation::Camp, "hello").await.unwrap();
    settle().await;
    // Alice has not transmitted anything, so only Bob counts as online.
    assert_eq!(alice.online_members().await, vec![bob_id.clone()]);

    clock.advance(ChronoDuration::minutes(6));
    alice.tick().await;
    clock.advance(ChronoDuration::minutes(30));
    alice.tick().await;

    let statuses: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::PresenceChanged { member, status } if member == bob_id => Some(status),
            _ => None,
        })
        .collect();
    use campmesh_shared::ConnectionStatus::*;
    assert_eq!(statuses, vec![Connected, Recent, Offline]);
    assert!(!alice.is_online(&bob_id).await);
}

#[tokio::test(start_paused = true)]
async fn outbox_overflow_drops_oldest_chatter() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let mut config = EngineConfig::new(SenderInfo::new("alice", "Alice", Role::General));
    config.outbox_capacity = 2;
    let alice = node_with(&mesh, config, &clock).await;
    mesh.set_online(&MemberId::new("alice"), false);
    let mut events = alice.subscribe();

    let first = alice.send_text(Conversation::Camp, "one").await.unwrap();
    let check_in = alice.check_in().await.unwrap();
    let third = alice.send_text(Conversation::Camp, "three").await.unwrap();
    settle().await;

    assert_eq!(alice.delivery_status(&first.id).await, Some(DeliveryStatus::Failed));
    assert_eq!(alice.delivery_status(&check_in.id).await, Some(DeliveryStatus::Queued));
    assert_eq!(alice.delivery_status(&third.id).await, Some(DeliveryStatus::Queued));
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::MessageDropped { id } if *id == first.id)));
}

#[tokio::test(start_paused = true)]
async fn outbox_full_of_critical_rejects_chatter() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let mut config = EngineConfig::new(SenderInfo::new("alice", "Alice", Role::General));
    config.outbox_capacity = 1;
    let alice = node_with(&mesh, config, &clock).await;
    mesh.set_online(&MemberId::new("alice"), false);

    let sos = alice.send_sos(None).await.unwrap();
    let chatter = alice.send_text(Conversation::Camp, "is anyone there").await.unwrap();

    assert_eq!(chatter.delivery_status, DeliveryStatus::Failed);
    assert_eq!(alice.delivery_status(&sos.id).await, Some(DeliveryStatus::Queued));
    assert_eq!(alice.emergency_state().await, EmergencyState::Active);
}

#[tokio::test(start_paused = true)]
async fn deleting_conversation_stops_delivery() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    let _bob = node(&mesh, "bob", Role::General, &clock).await;
    mesh.set_online(&MemberId::new("alice"), false);

    let dm = Conversation::Direct(MemberId::new("bob"));
    alice.send_text(dm.clone(), "one").await.unwrap();
    alice.send_text(dm.clone(), "two").await.unwrap();
    assert_eq!(alice.delete_conversation(&dm).await, 2);
    assert!(alice.messages(&dm).await.is_empty());

    mesh.set_online(&MemberId::new("alice"), true);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(alice.messages(&dm).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn simultaneous_camp_posts_converge() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    let bob = node(&mesh, "bob", Role::General, &clock).await;
    let carol = node(&mesh, "carol", Role::General, &clock).await;

    let (a, b) = tokio::join!(
        alice.send_text(Conversation::Camp, "ice at center camp"),
        bob.send_text(Conversation::Camp, "ice sold out"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.sequence, b.sequence);
    settle().await;

    let (winner, loser) = if a.id < b.id { (&a, &b) } else { (&b, &a) };
    let mut views = Vec::new();
    for engine in [&alice, &bob, &carol] {
        let log = engine.messages(&Conversation::Camp).await;
        let order: Vec<_> = log.iter().map(|m| (m.id, m.sequence)).collect();
        assert_eq!(order, vec![(winner.id, 1), (loser.id, 2)]);
        views.push(order);
    }
    assert!(views.windows(2).all(|w| w[0] == w[1]));

    assert_eq!(alice.delivery_status(&a.id).await, Some(DeliveryStatus::Delivered));
    assert_eq!(bob.delivery_status(&b.id).await, Some(DeliveryStatus::Delivered));
}

#[tokio::test(start_paused = true)]
async fn restored_outbox_is_sent_again() {
    let clock = ManualClock::new(Utc::now());
    let mesh = LoopbackMesh::new();
    let alice = node(&mesh, "alice", Role::General, &clock).await;
    mesh.set_online(&MemberId::new("alice"), false);

    let sent = alice.send_text(Conversation::Camp, "meet at the gate").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.delivery_status(&sent.id).await, Some(DeliveryStatus::Queued));
    let snapshot = alice.snapshot().await;
    alice.shutdown().await;

    let mesh = LoopbackMesh::new();
    let bob = node(&mesh, "bob", Role::General, &clock).await;
    let (handle, notifications) = mesh.join(MemberId::new("alice"));
    let restored = MeshEngine::builder(EngineConfig::new(SenderInfo::new("alice", "ALICE", Role::General)))
        .clock(clock.clone())
        .restore(snapshot)
        .spawn(handle, notifications)
        .await;
    settle().await;

    assert_eq!(restored.delivery_status(&sent.id).await, Some(DeliveryStatus::Delivered));
    let received = bob.messages(&Conversation::Camp).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, sent.id);
}

mod common;

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use courier_dispatch::engine::assignment::{assign, dispatch, mark_ready};
use courier_dispatch::engine::fleet::update_courier_position;
use courier_dispatch::engine::redistribution::{redistribute, RedistributionOutcome};
use courier_dispatch::error::AppError;
use courier_dispatch::events::{register_handlers, DispatchEvent};
use courier_dispatch::geo::offset_north;
use courier_dispatch::geo::polyline::encode_delimited;
use courier_dispatch::models::alert::AlertSeverity;
use courier_dispatch::models::courier::CourierStatus;
use courier_dispatch::models::decision::DecisionKind;
use courier_dispatch::models::order::OrderStatus;
use courier_dispatch::models::tenant::GeoConfidence;
use courier_dispatch::scheduler::{self, arrival, eta};
use tokio::time::timeout;

use common::{
    courier, in_transit_order, pickup, ready_order, slow_provider_state, tenant, test_state,
};

#[tokio::test]
async fn ten_minute_alert_fires_once_at_boundary() {
    let (state, sender) = test_state();
    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 0.0);

    let computed_at = Utc::now();
    let order = in_transit_order(
        &state,
        t1.id,
        rider.id,
        offset_north(&pickup(), 4_000.0),
        Some(20),
        Some(computed_at),
    );

    let before = arrival::tick(&state, computed_at + Duration::seconds(599)).await;
    assert_eq!(before.notified, 0);
    assert!(!state.store.order(t1.id, order.id).unwrap().ten_minute_alert_sent);

    // Tick every second straight through the boundary.
    for second in 590..=660 {
        arrival::tick(&state, computed_at + Duration::seconds(second)).await;
    }

    assert_eq!(sender.count_kind("ten_minutes"), 1);
    assert!(state.store.order(t1.id, order.id).unwrap().ten_minute_alert_sent);
}

#[tokio::test]
async fn overlapping_ticks_send_once() {
    let (state, sender) = test_state();
    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 0.0);
    let computed_at = Utc::now() - Duration::minutes(15);
    in_transit_order(
        &state,
        t1.id,
        rider.id,
        offset_north(&pickup(), 4_000.0),
        Some(20),
        Some(computed_at),
    );

    let now = Utc::now();
    let (a, b, c) = tokio::join!(
        arrival::tick(&state, now),
        arrival::tick(&state, now),
        arrival::tick(&state, now)
    );
    assert_eq!(a.notified + b.notified + c.notified, 1);
    assert_eq!(sender.count_kind("ten_minutes"), 1);
}

#[tokio::test]
async fn missing_channel_is_a_silent_no_op() {
    let (state, sender) = test_state();
    let t1 = tenant(&state, false);
    let rider = courier(&state, t1.id, "Ana", 0.0);
    let destination = offset_north(&pickup(), 4_000.0);
    let order = in_transit_order(
        &state,
        t1.id,
        rider.id,
        destination,
        Some(5),
        Some(Utc::now() - Duration::minutes(30)),
    );

    let report = arrival::tick(&state, Utc::now()).await;
    assert_eq!(report.examined, 0);

    let alerted = arrival::on_courier_position_update(&state, t1.id, rider.id, destination)
        .await
        .unwrap();
    assert!(alerted.is_empty());

    let stored = state.store.order(t1.id, order.id).unwrap();
    assert!(!stored.ten_minute_alert_sent);
    assert!(!stored.arriving_alert_sent);
    assert!(sender.messages().is_empty());
}

#[tokio::test]
async fn geofence_triggers_inside_fifty_meters_only_once() {
    let (state, sender) = test_state();
    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 0.0);
    let destination = offset_north(&pickup(), 4_000.0);
    let order = in_transit_order(&state, t1.id, rider.id, destination, None, None);

    let outside = offset_north(&destination, 51.0);
    let alerted = arrival::on_courier_position_update(&state, t1.id, rider.id, outside)
        .await
        .unwrap();
    assert!(alerted.is_empty());
    assert!(!state.store.order(t1.id, order.id).unwrap().arriving_alert_sent);

    let inside = offset_north(&destination, 49.0);
    for _ in 0..5 {
        arrival::on_courier_position_update(&state, t1.id, rider.id, inside)
            .await
            .unwrap();
    }

    assert_eq!(sender.count_kind("arriving"), 1);
    assert!(state.store.order(t1.id, order.id).unwrap().arriving_alert_sent);
}

#[tokio::test]
async fn geofence_checks_every_order_the_courier_holds() {
    let (state, sender) = test_state();
    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 0.0);
    let destination = offset_north(&pickup(), 4_000.0);
    let first = in_transit_order(&state, t1.id, rider.id, destination, None, None);
    let second = in_transit_order(&state, t1.id, rider.id, destination, None, None);

    let mut alerted = arrival::on_courier_position_update(&state, t1.id, rider.id, destination)
        .await
        .unwrap();
    alerted.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();

    assert_eq!(alerted, expected);
    assert_eq!(sender.count_kind("arriving"), 2);
}

#[tokio::test]
async fn geofence_ignores_fabricated_destinations() {
    let (state, sender) = test_state();
    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 0.0);
    let destination = offset_north(&pickup(), 4_000.0);
    let order = in_transit_order(&state, t1.id, rider.id, destination, None, None);
    state
        .store
        .update_order(t1.id, order.id, |order| {
            order.destination_confidence = Some(GeoConfidence::Fallback);
            Ok(())
        })
        .unwrap();

    arrival::on_courier_position_update(&state, t1.id, rider.id, destination)
        .await
        .unwrap();
    assert!(sender.messages().is_empty());
}

#[tokio::test]
async fn eta_tick_notifies_only_on_significant_change() {
    let (state, sender) = test_state();
    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 0.0);
    let order = in_transit_order(
        &state,
        t1.id,
        rider.id,
        offset_north(&pickup(), 3_000.0),
        Some(30),
        Some(Utc::now() - Duration::minutes(5)),
    );
    let mut events = state.events.subscribe();

    let now = Utc::now();
    let report = eta::tick(&state, now).await;
    assert_eq!(report.updated, 1);
    assert_eq!(report.notified, 1);

    let stored = state.store.order(t1.id, order.id).unwrap();
    assert_eq!(stored.eta_minutes, Some(7));
    assert_eq!(stored.eta_computed_at, Some(now));

    match events.recv().await.unwrap() {
        DispatchEvent::EtaChanged {
            previous_minutes,
            new_minutes,
            ..
        } => {
            assert_eq!(previous_minutes, 30);
            assert_eq!(new_minutes, 7);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Same position, same estimate: nothing to announce.
    let report = eta::tick(&state, Utc::now()).await;
    assert_eq!(report.updated, 1);
    assert_eq!(report.notified, 0);
    assert_eq!(sender.count_kind("eta_changed"), 1);
}

#[tokio::test]
async fn off_route_courier_raises_fleet_alert() {
    let (state, _sender) = test_state();
    let t1 = tenant(&state, true);
    let route_start = offset_north(&pickup(), 1_000.0);
    let route = encode_delimited(&[route_start, offset_north(&route_start, 100.0)]);

    let straying = courier(&state, t1.id, "Ana", 1_350.0);
    let strayed = in_transit_order(
        &state,
        t1.id,
        straying.id,
        offset_north(&pickup(), 3_000.0),
        Some(10),
        Some(Utc::now()),
    );
    let on_track = courier(&state, t1.id, "Bia", 1_250.0);
    let tracked = in_transit_order(
        &state,
        t1.id,
        on_track.id,
        offset_north(&pickup(), 3_000.0),
        Some(10),
        Some(Utc::now()),
    );
    for order_id in [strayed.id, tracked.id] {
        let route = route.clone();
        state
            .store
            .update_order(t1.id, order_id, move |order| {
                order.route_polyline = Some(route);
                Ok(())
            })
            .unwrap();
    }

    let report = eta::tick(&state, Utc::now()).await;
    assert_eq!(report.updated, 2);

    let alerts = state.store.fleet_alerts(t1.id);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].order_id, strayed.id);
    assert_eq!(alerts[0].severity, AlertSeverity::Warn);
    assert!(state.store.order(t1.id, strayed.id).unwrap().eta_minutes.is_some());
}

#[tokio::test]
async fn one_failing_order_does_not_abort_the_tick() {
    let (state, _sender) = test_state();
    let t1 = tenant(&state, true);
    let t2 = tenant(&state, true);
    let own = courier(&state, t1.id, "Ana", 0.0);
    let foreign = courier(&state, t2.id, "Bia", 0.0);

    in_transit_order(
        &state,
        t1.id,
        own.id,
        offset_north(&pickup(), 3_000.0),
        Some(10),
        Some(Utc::now()),
    );

    let mut poisoned = courier_dispatch::models::order::DeliveryOrder::new(t1.id, "Rua X")
        .with_destination(offset_north(&pickup(), 2_000.0), GeoConfidence::Exact);
    poisoned.status = OrderStatus::Dispatched;
    poisoned.courier_id = Some(foreign.id);
    state.store.insert_order(poisoned).unwrap();

    let report = eta::tick(&state, Utc::now()).await;
    assert_eq!(report.examined, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn redistribution_reports_every_order() {
    let (state, _sender) = test_state();
    let t1 = tenant(&state, true);
    let leaving = courier(&state, t1.id, "Ana", 0.0);
    let other = courier(&state, t1.id, "Bia", 500.0);

    let mut held = HashSet::new();
    for meters in [1_000.0, 2_000.0, 3_000.0] {
        let order = ready_order(&state, t1.id, meters);
        assign(&state, t1.id, order.id, leaving.id)
            .await
            .unwrap();
        held.insert(order.id);
    }
    assert_eq!(
        state.store.courier(t1.id, other.id).unwrap().status,
        CourierStatus::Available
    );

    let report = redistribute(&state, t1.id, leaving.id).await.unwrap();

    let reported: HashSet<_> = report.outcomes.iter().map(|outcome| outcome.order_id()).collect();
    assert_eq!(reported, held);

    for outcome in &report.outcomes {
        let stored = state.store.order(t1.id, outcome.order_id()).unwrap();
        match outcome {
            RedistributionOutcome::Reassigned { courier_id, .. } => {
                assert_eq!(*courier_id, other.id);
                assert_eq!(stored.status, OrderStatus::Dispatched);
                assert_eq!(stored.courier_id, Some(other.id));
            }
            RedistributionOutcome::Stranded { .. } => {
                assert_eq!(stored.status, OrderStatus::Ready);
                assert!(stored.courier_id.is_none());
            }
        }
    }
    assert!(report
        .outcomes
        .iter()
        .any(|outcome| matches!(outcome, RedistributionOutcome::Reassigned { .. })));

    let gone = state.store.courier(t1.id, leaving.id).unwrap();
    assert_eq!(gone.status, CourierStatus::Unavailable);
    assert_eq!(gone.active_orders, 0);

    let reassigned = report.outcomes.len() - report.stranded().len();
    assert_eq!(
        state.store.courier(t1.id, other.id).unwrap().active_orders as usize,
        reassigned
    );
    assert!(state
        .store
        .decisions(t1.id)
        .iter()
        .any(|entry| entry.kind == DecisionKind::Redistribution));
}

#[tokio::test]
async fn deactivation_during_slow_routing_does_not_lose_the_order() {
    let (state, _sender) = slow_provider_state(StdDuration::from_millis(300)).await;
    let t1 = tenant(&state, true);
    let leaving = courier(&state, t1.id, "Ana", 0.0);
    let order = ready_order(&state, t1.id, 2_000.0);

    let assigning = tokio::spawn({
        let state = state.clone();
        let (tenant_id, order_id, courier_id) = (t1.id, order.id, leaving.id);
        async move { assign(&state, tenant_id, order_id, courier_id).await }
    });
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let report = redistribute(&state, t1.id, leaving.id).await.unwrap();
    let assigned = assigning.await.unwrap();

    let stored = state.store.order(t1.id, order.id).unwrap();
    let gone = state.store.courier(t1.id, leaving.id).unwrap();
    let reported = report
        .outcomes
        .iter()
        .any(|outcome| outcome.order_id() == order.id);
    assert!(reported || stored.courier_id != Some(leaving.id));

    assert!(matches!(assigned, Err(AppError::Conflict(_))));
    assert_eq!(stored.status, OrderStatus::Ready);
    assert!(stored.courier_id.is_none());
    assert_eq!(gone.status, CourierStatus::Unavailable);
    assert_eq!(gone.active_orders, 0);
}

#[tokio::test]
async fn ready_order_without_couriers_is_left_untouched() {
    let (state, _sender) = test_state();
    let t1 = tenant(&state, true);
    let o1 = ready_order(&state, t1.id, 2_000.0);

    let err = dispatch(&state, t1.id, o1.id).await.unwrap_err();
    assert!(matches!(err, AppError::NoCourierAvailable));

    let stored = state.store.order(t1.id, o1.id).unwrap();
    assert_eq!(stored.status, OrderStatus::Ready);
    assert!(stored.courier_id.is_none());

    let decisions = state.store.decisions(t1.id);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].kind, DecisionKind::Selection);
    assert_eq!(decisions[0].order_id, Some(o1.id));
    assert!(decisions[0].candidates.is_empty());
}

#[tokio::test]
async fn scoring_never_mixes_tenants() {
    let (state, _sender) = test_state();
    let t1 = tenant(&state, true);
    let t2 = tenant(&state, true);
    courier(&state, t2.id, "Foreign", 0.0);
    let o1 = ready_order(&state, t1.id, 2_000.0);

    let err = dispatch(&state, t1.id, o1.id).await.unwrap_err();
    assert!(matches!(err, AppError::NoCourierAvailable));

    let err = dispatch(&state, t2.id, o1.id).await.unwrap_err();
    assert!(matches!(err, AppError::TenantMismatch(_)));
}

#[tokio::test]
async fn ready_event_drives_dispatch_through_the_bus() {
    let (state, _sender) = test_state();
    let handlers = register_handlers(state.clone());
    let mut events = state.events.subscribe();

    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 200.0);
    let order = ready_order(&state, t1.id, 2_000.0);

    mark_ready(&state, t1.id, order.id).unwrap();

    let completed = timeout(StdDuration::from_secs(5), async {
        loop {
            if let DispatchEvent::DispatchCompleted {
                order_id,
                courier_id,
                ..
            } = events.recv().await.unwrap()
            {
                break (order_id, courier_id);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(completed, (order.id, rider.id));
    assert_eq!(
        state.store.order(t1.id, order.id).unwrap().status,
        OrderStatus::Dispatched
    );
    handlers.abort();
}

#[tokio::test]
async fn position_event_drives_geofence_through_the_bus() {
    let (state, sender) = test_state();
    let handlers = register_handlers(state.clone());
    let mut events = state.events.subscribe();

    let t1 = tenant(&state, true);
    let rider = courier(&state, t1.id, "Ana", 0.0);
    let destination = offset_north(&pickup(), 4_000.0);
    let order = in_transit_order(&state, t1.id, rider.id, destination, None, None);

    update_courier_position(&state, t1.id, rider.id, offset_north(&destination, 10.0)).unwrap();

    let alert = timeout(StdDuration::from_secs(5), async {
        loop {
            if let DispatchEvent::AlertSent { order_id, alert, .. } = events.recv().await.unwrap() {
                break (order_id, alert);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(alert.0, order.id);
    assert_eq!(sender.count_kind("arriving"), 1);
    handlers.abort();
}

#[tokio::test]
async fn deactivation_event_redistributes() {
    let (state, _sender) = test_state();
    let handlers = register_handlers(state.clone());
    let mut events = state.events.subscribe();

    let t1 = tenant(&state, true);
    let leaving = courier(&state, t1.id, "Ana", 0.0);
    let other = courier(&state, t1.id, "Bia", 300.0);
    let order = ready_order(&state, t1.id, 2_000.0);
    assign(&state, t1.id, order.id, leaving.id)
        .await
        .unwrap();

    state.events.publish(DispatchEvent::CourierDeactivated {
        tenant_id: t1.id,
        courier_id: leaving.id,
    });

    let reassigned_to = timeout(StdDuration::from_secs(5), async {
        loop {
            if let DispatchEvent::DispatchCompleted { courier_id, .. } = events.recv().await.unwrap()
            {
                if courier_id != leaving.id {
                    break courier_id;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(reassigned_to, other.id);
    let stored = state.store.order(t1.id, order.id).unwrap();
    assert_eq!(stored.courier_id, Some(other.id));
    assert!(!stored.ten_minute_alert_sent);
    handlers.abort();
}

#[tokio::test]
async fn schedulers_shut_down_cleanly() {
    let (state, _sender) = test_state();
    let handle = scheduler::spawn(state);
    timeout(StdDuration::from_secs(5), handle.shutdown())
        .await
        .unwrap();
}

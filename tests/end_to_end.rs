use openremap::controller::{event_queue, ControllerEvent, Device, DeviceId, HatDirection};
use openremap::mapping::{
    CompiledProfile, CustomHandlers, DispatchOutcome, Dispatcher, MappingEngineHandle,
    OutputCommand, OutputError, RecordingSink,
};
use openremap::persistence::ProfileConfig;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PROFILE: &str = include_str!("../profiles/default.toml");

fn pad() -> DeviceId {
    DeviceId::from_u128(1)
}

fn dispatcher(sink: Arc<RecordingSink>) -> Dispatcher {
    let config = ProfileConfig::from_toml_str(DEFAULT_PROFILE).unwrap();
    let handlers = CustomHandlers::with_builtins();
    let profile = CompiledProfile::compile(&config, &handlers).unwrap();
    Dispatcher::new(Arc::new(profile), handlers, sink)
}

fn axis(device: u8, index: u8, value: f64) -> OutputCommand {
    OutputCommand::Axis {
        device,
        index,
        value,
    }
}

#[test]
fn flight_inherits_axis_and_switches_back_to_base() {
    let config = ProfileConfig::from_toml_str(
        r#"
        name = "minimal"

        [settings]
        startup_mode = "Flight"

        [[devices]]
        name = "device1"
        id = "00000000-0000-0000-0000-000000000001"

        [[modes]]
        name = "Base"

        [[modes.bindings]]
        device = "device1"
        input = { kind = "axis", index = 1 }
        action = { type = "remap", target = { device = 1, input = { kind = "axis", index = 1 } } }

        [[modes]]
        name = "Flight"
        parent = "Base"

        [[modes.bindings]]
        device = "device1"
        input = { kind = "button", index = 1 }
        action = { type = "switch_mode", mode = "Base" }
        "#,
    )
    .unwrap();
    let handlers = CustomHandlers::new();
    let profile = CompiledProfile::compile(&config, &handlers).unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut d = Dispatcher::new(Arc::new(profile), handlers, sink.clone());

    d.dispatch(&ControllerEvent::axis(pad(), 1, -0.4));
    assert_eq!(sink.take(), vec![axis(1, 1, -0.4)]);

    assert!(matches!(
        d.dispatch(&ControllerEvent::button(pad(), 1, true)),
        DispatchOutcome::ModeChanged { .. }
    ));
    assert_eq!(d.active_mode_name(), "Base");
    assert_eq!(
        d.dispatch(&ControllerEvent::button(pad(), 1, false)),
        DispatchOutcome::Unbound
    );
}

#[test]
fn temporary_landing_mode_inherits_and_reverts() {
    let sink = Arc::new(RecordingSink::new());
    let mut d = dispatcher(sink.clone());
    assert_eq!(d.active_mode_name(), "Flight");

    // Inside the dead zone the soft pipeline yields exactly zero
    assert_eq!(d.dispatch(&ControllerEvent::axis(pad(), 1, 0.02)), DispatchOutcome::Written);
    assert_eq!(sink.take(), vec![axis(1, 1, 0.0)]);

    assert!(matches!(
        d.dispatch(&ControllerEvent::button(pad(), 5, true)),
        DispatchOutcome::ModeChanged { .. }
    ));
    assert_eq!(d.active_mode_name(), "Landing");

    // Landing adds axis 4 and still sees Base bindings through Flight
    d.dispatch(&ControllerEvent::axis(pad(), 4, 0.5));
    d.dispatch(&ControllerEvent::button(pad(), 1, true));
    assert_eq!(
        sink.take(),
        vec![
            axis(1, 4, 0.5),
            OutputCommand::Button {
                device: 1,
                index: 1,
                pressed: true
            },
        ]
    );

    d.dispatch(&ControllerEvent::button(pad(), 5, false));
    assert_eq!(d.active_mode_name(), "Flight");
    assert_eq!(
        d.dispatch(&ControllerEvent::axis(pad(), 4, 0.5)),
        DispatchOutcome::Unbound
    );
}

#[test]
fn virtual_button_returns_to_previous_mode() {
    let sink = Arc::new(RecordingSink::new());
    let mut d = dispatcher(sink);

    d.dispatch(&ControllerEvent::button(pad(), 10, true));
    assert_eq!(d.active_mode_name(), "Base");
    d.dispatch(&ControllerEvent::button(pad(), 10, false));
    d.dispatch(&ControllerEvent::button(pad(), 10, true));
    assert_eq!(d.active_mode_name(), "Flight");

    d.dispatch(&ControllerEvent::button(pad(), 5, true));
    assert_eq!(d.active_mode_name(), "Landing");

    // Below the 0.9 threshold nothing happens
    assert_eq!(
        d.dispatch(&ControllerEvent::axis(pad(), 5, 0.5)),
        DispatchOutcome::Ignored
    );
    assert!(matches!(
        d.dispatch(&ControllerEvent::axis(pad(), 5, 0.95)),
        DispatchOutcome::ModeChanged { .. }
    ));
    assert_eq!(d.active_mode_name(), "Base");

    // The permanent switch dropped the temporary, releasing it changes nothing
    assert_eq!(
        d.dispatch(&ControllerEvent::button(pad(), 5, false)),
        DispatchOutcome::Unbound
    );
    assert_eq!(d.active_mode_name(), "Base");
}

#[test]
fn brake_pedals_merge_from_their_rest_positions() {
    let sink = Arc::new(RecordingSink::new());
    let mut d = dispatcher(sink.clone());
    assert_eq!(d.prime_outputs(), 2);
    assert_eq!(sink.take(), vec![axis(1, 5, 0.0), axis(1, 3, -1.0)]);

    d.dispatch(&ControllerEvent::axis(pad(), 6, 1.0));
    d.dispatch(&ControllerEvent::axis(pad(), 3, 0.0));
    d.dispatch(&ControllerEvent::axis(pad(), 6, -1.0));
    assert_eq!(
        sink.take(),
        vec![axis(1, 3, 1.0), axis(1, 3, 1.0), axis(1, 3, 0.0)]
    );
    d.dispatch(&ControllerEvent::axis(pad(), 3, -1.0));
    assert_eq!(sink.take(), vec![axis(1, 3, -1.0)]);
}

#[test]
fn hat_remap_and_disconnect() {
    let sink = Arc::new(RecordingSink::new());
    let mut d = dispatcher(sink.clone());

    d.dispatch(&ControllerEvent::button(pad(), 5, true));
    assert_eq!(d.active_mode_name(), "Landing");
    d.dispatch(&ControllerEvent::Disconnected(pad()));
    assert_eq!(d.active_mode_name(), "Flight");
    assert!(d.devices().is_disabled(pad()));
    // Both brake pedals were on the pad, the merged output returns to rest
    assert_eq!(sink.take(), vec![axis(1, 3, -1.0)]);

    assert_eq!(
        d.dispatch(&ControllerEvent::hat(pad(), 1, HatDirection::NorthEast)),
        DispatchOutcome::DeviceDisabled
    );
    d.dispatch(&ControllerEvent::Connected(Device {
        id: pad(),
        name: "Pad".to_string(),
        axis_count: 6,
        button_count: 15,
        hat_count: 1,
    }));
    d.dispatch(&ControllerEvent::hat(pad(), 1, HatDirection::NorthEast));
    assert_eq!(
        sink.take(),
        vec![OutputCommand::Hat {
            device: 1,
            index: 1,
            direction: HatDirection::NorthEast
        }]
    );
}

#[test]
fn unavailable_output_device_is_not_fatal() {
    let sink = Arc::new(RecordingSink::with_unavailable([1]));
    let mut d = dispatcher(sink);
    assert_eq!(
        d.dispatch(&ControllerEvent::axis(pad(), 1, 0.7)),
        DispatchOutcome::WriteFailed(OutputError::DeviceUnavailable(1))
    );
    assert!(matches!(
        d.dispatch(&ControllerEvent::button(pad(), 10, true)),
        DispatchOutcome::ModeChanged { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn flaps_macro_plays_through_the_engine() {
    let config = ProfileConfig::from_toml_str(DEFAULT_PROFILE).unwrap();
    let (producer, stream) = event_queue::channel(64);
    let sink = Arc::new(RecordingSink::new());
    let mut engine = MappingEngineHandle::new("e2e".to_string());
    let mode = engine
        .start(&config, stream, sink.clone(), CustomHandlers::with_builtins())
        .unwrap();
    assert_eq!(*mode.borrow(), "Flight");

    producer
        .push(ControllerEvent::button(pad(), 2, true))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let flaps: Vec<bool> = sink
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            OutputCommand::Button {
                device: 1,
                index: 10,
                pressed,
            } => Some(pressed),
            _ => None,
        })
        .collect();
    assert_eq!(flaps, vec![true, false, true, false]);

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn trim_wheel_moves_elevator_trim_relative_to_its_start() {
    let sink = Arc::new(RecordingSink::new());
    let mut d = dispatcher(sink.clone());
    d.prime_outputs();
    sink.take();

    assert_eq!(
        d.dispatch(&ControllerEvent::axis(pad(), 7, 1.0)),
        DispatchOutcome::RelativeRate(0.5)
    );
    tokio::time::sleep(Duration::from_millis(1005)).await;
    d.dispatch(&ControllerEvent::axis(pad(), 7, 0.0));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let trim: Vec<f64> = sink
        .take()
        .into_iter()
        .filter_map(|c| match c {
            OutputCommand::Axis {
                device: 1,
                index: 5,
                value,
            } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(trim.len(), 100);
    assert!((trim[99] - 0.5).abs() < 1e-9);
    assert!(trim.windows(2).all(|w| w[1] > w[0]));

    d.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn engine_publishes_mode_released_by_a_disconnect() {
    let config = ProfileConfig::from_toml_str(DEFAULT_PROFILE).unwrap();
    let (producer, stream) = event_queue::channel(64);
    let mut engine = MappingEngineHandle::new("e2e-disconnect".to_string());
    let mut mode = engine
        .start(
            &config,
            stream,
            Arc::new(RecordingSink::new()),
            CustomHandlers::with_builtins(),
        )
        .unwrap();

    producer
        .push(ControllerEvent::button(pad(), 5, true))
        .await
        .unwrap();
    mode.changed().await.unwrap();
    assert_eq!(*mode.borrow_and_update(), "Landing");

    producer.push(ControllerEvent::Disconnected(pad())).await.unwrap();
    mode.changed().await.unwrap();
    assert_eq!(*mode.borrow(), "Flight");
    assert_eq!(engine.active_mode().as_deref(), Some("Flight"));

    engine.shutdown().await.unwrap();
}

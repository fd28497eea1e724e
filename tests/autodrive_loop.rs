use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use hvps_autodrive::config::{load_from_str, SimulationSection};
use hvps_autodrive::sim::{SimHandle, SimulatedModulator};
use hvps_autodrive::tasks::{plant_task, spawn_autodrive, LoopSettings};
use hvps_autodrive::telemetry::StateCode;
use hvps_autodrive::{Actuator, ChannelId, CommandQueue, DeviceId, DeviceRegistry, GovernorFile};

const CONFIG: &str = r#"
[governor]
tick_period_ms = 1000
startup_delay_ms = 5000

[[devices]]
channel_count = 2
master_channel = 0

[[devices.channels]]
index = 1
enabled = true

[simulation]
poll_period_ms = 500
slew_rate_v_per_s = 5.0
vacuum_baseline = 4.0
outgassing_gain = 0.0
"#;

struct Rig {
    registry: DeviceRegistry,
    sim: SimHandle,
}

fn start(file: GovernorFile) -> Rig {
    let registry = DeviceRegistry::from_config(&file);
    let simulation: SimulationSection = file.simulation.clone().unwrap_or_default();
    let (modulator, sim) = SimulatedModulator::new(Arc::clone(&registry.devices()[0]), simulation.clone());
    let (queue, commands) = CommandQueue::new(file.governor.command_queue_capacity);
    tokio::spawn(plant_task(vec![modulator], commands, simulation.poll_period()));

    let actuator: Arc<dyn Actuator> = Arc::new(queue);
    spawn_autodrive(&registry, actuator, LoopSettings::from_section(&file.governor)).unwrap();
    Rig { registry, sim }
}

#[tokio::test(start_paused = true)]
async fn test_ramp_climbs_in_fast_regime() {
    let rig = start(load_from_str(CONFIG, "test").unwrap());
    let device = rig.registry.device(DeviceId(0)).unwrap();

    sleep(Duration::from_secs(60)).await;

    let telemetry = device.telemetry().unwrap();
    assert_eq!(telemetry.state, StateCode::RUNNING);
    // 10 V per 10 s once the first interval after startup has passed
    assert!(telemetry.hv_set >= 40.0, "hv_set = {}", telemetry.hv_set);
    assert!(telemetry.hv_set <= 60.0, "hv_set = {}", telemetry.hv_set);

    let master = rig.registry.channel(ChannelId::new(0, 0)).unwrap();
    assert!(!master.status().arcing);
    assert!(master.status().ticks >= 50);
}

#[tokio::test(start_paused = true)]
async fn test_trip_and_interlock_recovery() {
    let rig = start(load_from_str(CONFIG, "test").unwrap());
    let device = rig.registry.device(DeviceId(0)).unwrap();
    let master = rig.registry.channel(ChannelId::new(0, 0)).unwrap();

    sleep(Duration::from_secs(40)).await;
    rig.sim.set_vacuum(0, Some(5.3));
    sleep(Duration::from_secs(3)).await;

    assert!(master.status().arcing);
    assert_eq!(device.telemetry().unwrap().state, StateCode::TRIP);

    // Vacuum recovers; the device stays tripped through the hold-off
    rig.sim.set_vacuum(0, None);
    sleep(Duration::from_secs(200)).await;
    assert_eq!(device.telemetry().unwrap().state, StateCode::TRIP);

    // Hold-off (300 s), settle (5 s), restart delay (5 s)
    sleep(Duration::from_secs(150)).await;
    let telemetry = device.telemetry().unwrap();
    assert_eq!(telemetry.state, StateCode::RUNNING);
    assert_eq!(telemetry.hv_set, 300.0);
}

#[tokio::test(start_paused = true)]
async fn test_field_write_takes_effect() {
    let rig = start(load_from_str(CONFIG, "test").unwrap());
    let master = rig.registry.channel(ChannelId::new(0, 0)).unwrap();

    sleep(Duration::from_secs(10)).await;
    assert!(!master.status().alarming);

    // Lowering alarm_high below the current reading puts the channel in alarm
    master
        .update(|c| {
            c.thresholds.alarm_high = 3.9;
            c.thresholds.alarm_low = 3.8;
        })
        .unwrap();
    sleep(Duration::from_secs(2)).await;
    assert!(master.status().alarming);
    assert!(master.status().hold.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_slave_channel_never_actuates() {
    let rig = start(load_from_str(CONFIG, "test").unwrap());
    let device = rig.registry.device(DeviceId(0)).unwrap();
    let slave = rig.registry.channel(ChannelId::new(0, 1)).unwrap();

    // Arcing on the slave's slot only
    rig.sim.set_vacuum(1, Some(5.3));
    sleep(Duration::from_secs(30)).await;

    assert!(slave.status().arcing);
    assert_eq!(device.telemetry().unwrap().state, StateCode::RUNNING);
}

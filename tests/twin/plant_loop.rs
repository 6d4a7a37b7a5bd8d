use std::sync::Arc;
use std::time::Duration;

use azru::bus::{valve_command_payload, InMemoryBus, MessageBus, Topics};
use azru::domain::{PlantParameters, ThermalState};
use azru::forecast::{DayWeather, Forecaster, Scenario};
use azru::repo::{HistoryReader, InMemorySeriesStore};
use azru::simulation::{SimulationSettings, Simulator};
use chrono::{NaiveDate, NaiveDateTime};
use tokio_util::sync::CancellationToken;

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 10)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Constant 15 °C outside, overcast all day.
fn constant_weather() -> Arc<Forecaster> {
    let scenario = Scenario {
        weather: vec![DayWeather {
            t_min: 15.0,
            t_max: 15.0,
            nebulosity: 1.0,
        }],
        ..Default::default()
    };
    Arc::new(Forecaster::from_scenario(
        Arc::new(scenario),
        start().date(),
        None,
    ))
}

#[tokio::test]
async fn test_one_hour_at_full_heat_matches_euler_step() {
    let settings = SimulationSettings {
        step_seconds: 3600,
        speed_factor: 0.0,
        initial_valve: 100,
        sensor_noise_std: 0.0,
        ..Default::default()
    };
    let params = PlantParameters::default();
    let mut sim = Simulator::new(
        &settings,
        params,
        constant_weather(),
        ThermalState::new(19.0),
        start(),
        Topics::default(),
        Arc::new(InMemorySeriesStore::default()),
        Arc::new(InMemoryBus::default()),
    );

    let report = sim.tick().await;

    let ua = params.area_m2 / params.r;
    let expected = 19.0 + (ua * (15.0 - 19.0) + 4500.0) * 3600.0 / params.c;
    assert!((report.t_air_c - expected).abs() < 1e-9);
    assert_eq!(report.heating_w, 4500.0);
    assert_eq!(report.solar_w, 0.0);
    // 4.5 kWh at the flat 0.15 €/kWh
    assert!((report.cost_step_eur - 0.675).abs() < 1e-12);
}

#[tokio::test]
async fn test_bus_command_drives_running_simulation() {
    let settings = SimulationSettings {
        step_seconds: 900,
        speed_factor: 3600.0,
        sensor_noise_std: 0.0,
        ..Default::default()
    };
    let bus = Arc::new(InMemoryBus::default());
    let store = Arc::new(InMemorySeriesStore::default());
    let sim = Simulator::new(
        &settings,
        PlantParameters::default(),
        constant_weather(),
        ThermalState::new(19.0),
        start(),
        Topics::default(),
        store.clone(),
        bus.clone(),
    );
    let valve = sim.valve();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(sim.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(2), async {
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    bus.publish(&Topics::default().command, valve_command_payload(80))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while valve.get() != 80 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    cancel.cancel();
    let report = handle.await.unwrap().unwrap();
    assert!(report.ticks >= 2);

    let last_valve = store
        .get_latest("sensors", "living_room", "valve_position")
        .await
        .unwrap();
    assert_eq!(last_valve, Some(80.0));
    assert_eq!(store.records("valve_commands").len(), 1);
}

use std::io::Write;

use azru::config::Config;
use azru::runtime::{run_batch, run_twin, BatchMode};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

const OVERCAST_WINTER: &str = r#"{
    "initial_temp": 19.0,
    "duration_days": 2,
    "weather": [
        { "t_min": 0.0, "t_max": 6.0, "nebulosity": 1.0 },
        { "t_min": 2.0, "t_max": 8.0, "nebulosity": 1.0 }
    ],
    "prices": {
        "default": 0.15,
        "schedule": { "peak": 0.25, "off_peak": 0.15, "peak_hours": [[7.0, 10.0], [18.0, 22.0]] }
    }
}"#;

fn scenario_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(OVERCAST_WINTER.as_bytes()).unwrap();
    file
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 5)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn config(scenario: &NamedTempFile, step_seconds: u32) -> Config {
    let mut cfg = Config::default();
    cfg.simulation.scenario_path = scenario.path().to_path_buf();
    cfg.simulation.step_seconds = step_seconds;
    cfg.simulation.sensor_noise_std = 0.0;
    cfg.server.enabled = false;
    cfg
}

#[tokio::test]
async fn test_manual_batch_holds_target() {
    let scenario = scenario_file();
    let cfg = config(&scenario, 60);
    let end = start() + Duration::days(2);

    let report = run_batch(&cfg, start(), end, BatchMode::Manual).await.unwrap();

    assert_eq!(report.ticks, 2 * 24 * 60);
    assert_eq!(report.started, start());
    assert_eq!(report.ended, end);
    assert!(report.total_cost > 0.0);
    let t = report.final_state.t_air_c;
    assert!((19.0..=20.0).contains(&t), "final temperature {t}");
}

#[tokio::test]
async fn test_mpc_batch_respects_comfort_floor() {
    let scenario = scenario_file();
    let cfg = config(&scenario, 900);
    let end = start() + Duration::days(1);

    let report = run_batch(&cfg, start(), end, BatchMode::Mpc).await.unwrap();

    assert_eq!(report.ticks, 96);
    assert!(report.total_cost > 0.0);
    let t = report.final_state.t_air_c;
    assert!(
        t > cfg.mpc.comfort.t_min_c - 0.5 && t < cfg.mpc.comfort.t_max_c,
        "final temperature {t}"
    );
}

#[tokio::test]
async fn test_twin_runs_to_configured_end() {
    let scenario = scenario_file();
    let mut cfg = config(&scenario, 900);
    cfg.simulation.start_time = Some(start());
    cfg.simulation.duration_hours = Some(2.0);
    cfg.simulation.speed_factor = 0.0;

    let report = run_twin(cfg, CancellationToken::new()).await.unwrap();

    assert_eq!(report.ticks, 8);
    assert_eq!(report.ended, start() + Duration::hours(2));
}

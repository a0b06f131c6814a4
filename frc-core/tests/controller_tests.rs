use core::cell::RefCell;

use frc_core::utils::config::{ConfigError, RobotConfig};
use frc_core::utils::connection::table::{NetworkTable, TableError, TableValue};
use frc_core::utils::controllers::drivetrain::{
    Drivetrain, DriverStick, ScaledEncoders, Side, TableStick, STICK_X_KEY, STICK_Y_KEY,
};
use frc_core::utils::controllers::{RobotController, RobotMode, DASHBOARD_KEYS, MODE_CHANNEL};
use frc_core::utils::sim::{
    IdleStick, PlantParams, SimActuators, SimClock, SimEncoders, SimPlant, SimPower,
};

type SimController<'a, S> = RobotController<
    'a,
    SimPower<'a>,
    ScaledEncoders<SimEncoders<'a>>,
    SimActuators<'a>,
    SimClock<'a>,
    S,
>;

fn controller<'a, S: DriverStick>(
    plant: &'a RefCell<SimPlant>,
    table: &'a NetworkTable,
    stick: S,
    config: RobotConfig,
) -> SimController<'a, S> {
    let drivetrain = Drivetrain::new(
        SimPower::new(plant),
        ScaledEncoders::new(
            SimEncoders::new(plant),
            config.ticks_per_foot,
            config.rate_periods_per_second,
        ),
        SimActuators::new(plant),
        SimClock::new(plant),
    );
    RobotController::new(drivetrain, stick, table, config)
}

fn tick<S: DriverStick>(
    robot: &mut SimController<'_, S>,
    plant: &RefCell<SimPlant>,
    cycles: usize,
) {
    for _ in 0..cycles {
        robot.periodic().unwrap();
        plant.borrow_mut().step(0.02);
    }
}

#[test]
fn starts_disabled_and_publishes_no_telemetry() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.5).unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    assert_eq!(robot.mode(), RobotMode::Disabled);
    tick(&mut robot, &plant, 5);
    assert_eq!(table.get("/robot/telemetry"), None);
    assert_eq!(plant.borrow().command(Side::Left), 0.0);
}

#[test]
fn characterization_to_disabled_stops_immediately() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.5).unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    robot.set_mode(RobotMode::Characterization).unwrap();
    tick(&mut robot, &plant, 10);
    assert_eq!(plant.borrow().command(Side::Left), 0.5);
    assert_eq!(robot.run_state().unwrap().prior_command(), 0.5);
    let published = table.revision("/robot/telemetry").unwrap();

    robot.set_mode(RobotMode::Disabled).unwrap();
    assert_eq!(plant.borrow().command(Side::Left), 0.0);
    assert_eq!(plant.borrow().command(Side::Right), 0.0);
    assert!(robot.run_state().is_none());

    tick(&mut robot, &plant, 10);
    assert_eq!(table.revision("/robot/telemetry"), Some(published));
    assert_eq!(plant.borrow().command(Side::Left), 0.0);
}

#[test]
fn reentering_characterization_resets_the_run() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.5).unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    robot.set_mode(RobotMode::Characterization).unwrap();
    tick(&mut robot, &plant, 15);
    robot.set_mode(RobotMode::Disabled).unwrap();
    tick(&mut robot, &plant, 5);

    table.set_double("/robot/autospeed", 0.0).unwrap();
    robot.set_mode(RobotMode::Characterization).unwrap();
    let run = robot.run_state().unwrap();
    assert_eq!(run.prior_command(), 0.0);
    assert_eq!(run.cycles(), 0);

    // The wheels may still be coasting, but odometry restarts from zero.
    let sample = robot.periodic().unwrap().unwrap();
    assert!(sample.left_position.abs() < 1e-9);
    assert!(sample.right_position.abs() < 1e-9);
}

#[test]
fn teleop_uses_arcade_drive_and_ignores_autospeed() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.9).unwrap();
    table.set_double(STICK_Y_KEY, -0.5).unwrap();
    table.set_double(STICK_X_KEY, 0.0).unwrap();
    let mut robot = controller(&plant, &table, TableStick::new(&table), RobotConfig::default());

    robot.set_mode(RobotMode::Teleop).unwrap();
    assert_eq!(robot.periodic().unwrap(), None);

    // Stick pushed forward half way, squared.
    assert!((plant.borrow().command(Side::Left) - 0.25).abs() < 1e-12);
    assert!((plant.borrow().command(Side::Right) - 0.25).abs() < 1e-12);
    assert_eq!(table.get("/robot/telemetry"), None);
}

#[test]
fn entering_teleop_zeroes_output_first() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.5).unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    robot.set_mode(RobotMode::Characterization).unwrap();
    tick(&mut robot, &plant, 3);
    robot.set_mode(RobotMode::Teleop).unwrap();
    assert_eq!(plant.borrow().command(Side::Left), 0.0);

    let published = table.revision("/robot/telemetry");
    tick(&mut robot, &plant, 3);
    assert_eq!(table.revision("/robot/telemetry"), published);
}

#[test]
fn dashboard_feedback_follows_config() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());
    robot.periodic().unwrap();
    for (_, pos_key, rate_key) in DASHBOARD_KEYS {
        assert_eq!(table.get_double(pos_key, f64::NAN), 0.0);
        assert_eq!(table.get_double(rate_key, f64::NAN), 0.0);
    }

    let quiet = NetworkTable::new();
    let config = RobotConfig {
        dashboard_feedback: false,
        ..RobotConfig::default()
    };
    let mut robot = controller(&plant, &quiet, IdleStick, config);
    robot.periodic().unwrap();
    assert!(quiet.snapshot().is_empty());
}

#[test]
fn setting_the_same_mode_is_a_no_op() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.5).unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    robot.set_mode(RobotMode::Characterization).unwrap();
    tick(&mut robot, &plant, 4);
    robot.set_mode(RobotMode::Characterization).unwrap();
    assert_eq!(robot.run_state().unwrap().cycles(), 4);
}

#[test]
fn abort_disables_and_drops_the_run() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", -0.4).unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    robot.set_mode(RobotMode::Characterization).unwrap();
    tick(&mut robot, &plant, 2);
    robot.abort().unwrap();
    assert_eq!(robot.mode(), RobotMode::Disabled);
    assert!(robot.run_state().is_none());
    assert_eq!(plant.borrow().command(Side::Right), 0.0);
}

#[test]
fn config_defaults_and_validation() {
    let config = RobotConfig::default();
    assert_eq!(config.loop_period_ms, 20);
    assert_eq!(config.table_update_rate_ms, 10);
    assert_eq!(config.ticks_per_foot, 1935.0);
    assert_eq!(config.autospeed_key, "/robot/autospeed");
    assert_eq!(config.telemetry_key, "/robot/telemetry");
    assert_eq!(config.validate(), Ok(()));

    let slow = RobotConfig {
        table_update_rate_ms: 50,
        ..RobotConfig::default()
    };
    assert_eq!(
        slow.validate(),
        Err(ConfigError::UpdateRateTooSlow {
            update_rate_ms: 50,
            loop_period_ms: 20
        })
    );

    let zero = RobotConfig {
        loop_period_ms: 0,
        ..RobotConfig::default()
    };
    assert_eq!(zero.validate(), Err(ConfigError::ZeroLoopPeriod));

    let unscaled = RobotConfig {
        ticks_per_foot: 0.0,
        ..RobotConfig::default()
    };
    assert_eq!(unscaled.validate(), Err(ConfigError::InvalidScale));

    let keyless = RobotConfig {
        telemetry_key: String::new(),
        ..RobotConfig::default()
    };
    assert_eq!(keyless.validate(), Err(ConfigError::EmptyKey("telemetry_key")));

    let parsed: RobotConfig =
        serde_json::from_str(r#"{"ticks_per_foot": 2000.0, "deadband": 0.05}"#).unwrap();
    assert_eq!(parsed.ticks_per_foot, 2000.0);
    assert_eq!(parsed.loop_period_ms, 20);
    assert_eq!(parsed.validate(), Ok(()));
}

#[test]
fn loop_applies_mode_requests_and_disables_on_fault() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.5).unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    MODE_CHANNEL.try_send(RobotMode::Characterization).unwrap();
    assert!(robot.service().is_some());
    assert_eq!(robot.mode(), RobotMode::Characterization);
    assert_eq!(plant.borrow().command(Side::Left), 0.5);

    // A scalar where the telemetry array belongs makes every publish fail.
    let robot_table = NetworkTable::new();
    let config = RobotConfig {
        telemetry_key: "/robot/scalar".to_string(),
        ..RobotConfig::default()
    };
    robot_table.set_double("/robot/scalar", 1.0).unwrap();
    robot_table.set_double("/robot/autospeed", 0.5).unwrap();
    let mut faulty = controller(&plant, &robot_table, IdleStick, config);
    faulty.set_mode(RobotMode::Characterization).unwrap();

    assert_eq!(faulty.service(), None);
    assert_eq!(faulty.mode(), RobotMode::Disabled);
    assert!(faulty.run_state().is_none());
    assert_eq!(plant.borrow().command(Side::Left), 0.0);
    assert_eq!(plant.borrow().command(Side::Right), 0.0);
}

#[test]
fn robot_reserves_the_keys_it_publishes() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    let _robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    assert!(table.is_reserved("/robot/telemetry"));
    assert!(!table.is_reserved("/robot/autospeed"));
    for (_, pos_key, rate_key) in DASHBOARD_KEYS {
        assert_eq!(
            table.put_remote(pos_key, TableValue::DoubleArray(vec![1.0])),
            Err(TableError::ReadOnly {
                key: pos_key.to_string()
            })
        );
        assert!(table.is_reserved(rate_key));
    }
}

#[test]
fn dashboard_failure_does_not_abort_characterization() {
    let plant = RefCell::new(SimPlant::new(PlantParams::default()));
    let table = NetworkTable::new();
    table.set_double("/robot/autospeed", 0.3).unwrap();
    // Wrong type under a dashboard key, written before the robot owned it.
    table
        .set_double_array("/SmartDashboard/l_encoder_pos", &[1.0])
        .unwrap();
    let mut robot = controller(&plant, &table, IdleStick, RobotConfig::default());

    robot.set_mode(RobotMode::Characterization).unwrap();
    let sample = robot.periodic().unwrap().unwrap();
    assert_eq!(sample.commanded_speed, 0.3);
    assert_eq!(
        table.get_double_array("/robot/telemetry"),
        Some(sample.to_array().to_vec())
    );

    tick(&mut robot, &plant, 3);
    assert_eq!(robot.mode(), RobotMode::Characterization);
    assert_eq!(robot.run_state().unwrap().cycles(), 4);
}

use clap::Parser;
use core::cell::RefCell;
use embassy_executor::{Executor, Spawner};
use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Runner, StackResources};
use embassy_net_tuntap::TunTapDevice;
use embassy_time::{Duration, Instant, Ticker};
use frc_core::mk_static;
use frc_core::utils::connection::server::AppState;
use frc_core::utils::controllers::drivetrain::{Drivetrain, MonotonicClock, ScaledEncoders, TableStick};
use frc_core::utils::sim::{PlantParams, SimActuators, SimEncoders, SimPlant, SimPower};
use frc_core::utils::{NetworkTable, RobotConfig, RobotController, wss};
use heapless::Vec;
use rand_core::{OsRng, TryRngCore};
use static_cell::StaticCell;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Physics integration step for the simulated drivetrain.
const PHYSICS_PERIOD: Duration = Duration::from_millis(5);

type SimRobot = RobotController<
    'static,
    SimPower<'static>,
    ScaledEncoders<SimEncoders<'static>>,
    SimActuators<'static>,
    MonotonicClock,
    TableStick<'static>,
>;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts
{
    /// TAP device name
    #[clap(long, default_value = "tap0")]
    tap: String,
    /// use a static IP instead of DHCP
    #[clap(long)]
    static_ip: bool,
    /// port the table server listens on
    #[clap(long, default_value_t = 8000)]
    port: u16,
    /// JSON robot configuration; unset fields keep their defaults
    #[clap(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<RobotConfig, String> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("reading {}: {e}", path.display()))?;
            serde_json::from_str::<RobotConfig>(&text)
                .map_err(|e| format!("parsing {}: {e}", path.display()))?
        }
        None => RobotConfig::default(),
    };
    config.validate().map_err(|e| format!("invalid config: {e:?}"))?;
    Ok(config)
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, TunTapDevice>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn robot_task(mut robot: SimRobot) -> ! {
    robot.run().await
}

#[embassy_executor::task]
async fn physics_task(plant: &'static RefCell<SimPlant>) -> ! {
    let mut ticker = Ticker::every(PHYSICS_PERIOD);
    let mut last = Instant::now();
    loop {
        ticker.next().await;
        let now = Instant::now();
        let dt = (now - last).as_micros() as f64 / 1_000_000.0;
        last = now;
        plant.borrow_mut().step(dt);
    }
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner, opts: Opts, config: RobotConfig) {
    // Simulated drivetrain shared by the robot and physics tasks
    let plant: &'static RefCell<SimPlant> = mk_static!(
        RefCell<SimPlant>,
        RefCell::new(SimPlant::new(PlantParams {
            ticks_per_foot: config.ticks_per_foot,
            ..PlantParams::default()
        }))
    );
    let table: &'static NetworkTable = mk_static!(NetworkTable, NetworkTable::new());

    let state = AppState {
        table,
        update_rate: config.table_update_rate(),
    };

    let drivetrain = Drivetrain::new(
        SimPower::new(plant),
        ScaledEncoders::new(
            SimEncoders::new(plant),
            config.ticks_per_foot,
            config.rate_periods_per_second,
        ),
        SimActuators::new(plant),
        MonotonicClock,
    );
    let robot = RobotController::new(drivetrain, TableStick::new(table), table, config);
    spawner.spawn(physics_task(plant)).unwrap();
    spawner.spawn(robot_task(robot)).unwrap();

    // Initialize network
    let device = match TunTapDevice::new(&opts.tap) {
        Ok(device) => device,
        Err(e) => {
            error!("Failed to open TAP device {}: {:?}", opts.tap, e);
            std::process::exit(1);
        }
    };
    let net_config = if opts.static_ip {
        Config::ipv4_static(embassy_net::StaticConfigV4 {
            address: Ipv4Cidr::new(Ipv4Address::new(192, 168, 69, 2), 24),
            dns_servers: Vec::new(),
            gateway: Some(Ipv4Address::new(192, 168, 69, 1)),
        })
    } else {
        Config::dhcpv4(Default::default())
    };
    let mut seed_buf = [0; 8];
    if let Err(e) = OsRng.try_fill_bytes(&mut seed_buf) {
        warn!("OS RNG unavailable ({:?}), using a fixed network seed", e);
    }
    let seed = u64::from_le_bytes(seed_buf);

    let (stack, runner) = embassy_net::new(
        device,
        net_config,
        mk_static!(StackResources<3>, StackResources::<3>::new()),
        seed,
    );
    spawner.spawn(net_task(runner)).unwrap();

    info!("Waiting for network link...");
    stack.wait_config_up().await;

    info!("Starting table server on port {}", opts.port);
    wss(0, opts.port, stack, state, None).await;
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let config = match load_config(opts.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };
    info!(?config, "robot configuration loaded");

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner, opts, config)).unwrap();
    });
}

//! Host-side stand-in for the rover MCU.
//!
//! Runs the BLE UART service and the control loop on the embassy std executor.
//! The radio is simulated from stdin, one event per line:
//!
//! ```text
//! connect <handle>
//! disconnect <handle>
//! write <handle> <text>
//! notify <text>
//! close
//! quit
//! ```
//!
//! Any other line is written to the RX characteristic from the `--peer` handle.
//! PWM writes are logged whenever a channel's duty changes.

use std::{convert::Infallible, io::BufRead, path::PathBuf, thread};

use clap::Parser;
use embassy_executor::{Executor, Spawner};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, signal::Signal};
use embedded_hal::pwm::{ErrorType, SetDutyCycle};
use rover_core::{
    mk_static,
    utils::{
        connection::uart::{Advertisement, AttrHandle, ConnHandle, ServiceDef},
        controllers::MAX_DUTY,
        Actuators, BleEvent, BleStack, CommandDecoder, ControlLoop, RoverConfig, UartService,
        COMMAND_MAILBOX,
    },
};
use tracing::{error, info, warn};

const RX_CAPACITY: usize = 128;
type Payload = heapless::Vec<u8, RX_CAPACITY>;

type Service = UartService<SimStack, CommandDecoder<'static, CriticalSectionRawMutex>, RX_CAPACITY>;
type Control = ControlLoop<'static, CriticalSectionRawMutex, LogPwm, LogPwm>;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// JSON config file; missing fields use the defaults
    #[clap(long)]
    config: Option<PathBuf>,
    /// override the control loop period
    #[clap(long)]
    period_ms: Option<u64>,
    /// connection handle used for bare command lines
    #[clap(long, default_value_t = 1)]
    peer: ConnHandle,
    /// print the effective config as JSON and exit
    #[clap(long)]
    print_config: bool,
}

enum SimEvent {
    Connect(ConnHandle),
    Disconnect(ConnHandle),
    Write(ConnHandle, Payload),
    Notify(Payload),
    Close,
    Quit,
}

static SIM_EVENTS: Channel<CriticalSectionRawMutex, SimEvent, 16> = Channel::new();
static STOP: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// BLE stack that logs GAP/GATT calls and prints notifications to stdout.
struct SimStack;

impl BleStack for SimStack {
    type Error = Infallible;

    fn register_uart_service(
        &mut self,
        service: &ServiceDef,
    ) -> Result<(AttrHandle, AttrHandle), Self::Error> {
        info!("registering service {:032x}", service.uuid);
        Ok((1, 2))
    }

    fn set_buffer(
        &mut self,
        attr: AttrHandle,
        len: usize,
        append: bool,
    ) -> Result<(), Self::Error> {
        info!(attr, len, append, "gatts buffer set");
        Ok(())
    }

    fn advertise(
        &mut self,
        adv: &Advertisement,
    ) -> Result<(), Self::Error> {
        info!(
            name = adv.name.as_str(),
            appearance = adv.appearance,
            interval_ms = adv.interval.as_millis(),
            "gap advertise"
        );
        Ok(())
    }

    fn notify(
        &mut self,
        conn: ConnHandle,
        _attr: AttrHandle,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        println!("notify -> {conn}: {}", String::from_utf8_lossy(data));
        Ok(())
    }

    fn disconnect(
        &mut self,
        conn: ConnHandle,
    ) -> Result<(), Self::Error> {
        info!(conn, "gap disconnect");
        Ok(())
    }
}

/// PWM channel that logs duty changes.
struct LogPwm {
    name: &'static str,
    freq_hz: u32,
    duty: Option<u16>,
}

impl LogPwm {
    fn new(
        name: &'static str,
        freq_hz: u32,
    ) -> Self {
        LogPwm {
            name,
            freq_hz,
            duty: None,
        }
    }
}

impl ErrorType for LogPwm {
    type Error = Infallible;
}

impl SetDutyCycle for LogPwm {
    fn max_duty_cycle(&self) -> u16 {
        MAX_DUTY
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        if self.duty != Some(duty) {
            info!(channel = self.name, freq_hz = self.freq_hz, duty, "pwm");
            self.duty = Some(duty);
        }
        Ok(())
    }
}

fn payload(text: &str) -> Payload {
    let bytes = text.as_bytes();
    Payload::from_slice(&bytes[..bytes.len().min(RX_CAPACITY)]).unwrap_or_default()
}

fn parse_sim_line(
    line: &str,
    peer: ConnHandle,
) -> Option<SimEvent> {
    let mut parts = line.trim().splitn(3, ' ');
    let head = parts.next()?;
    let handle = |p: Option<&str>| p.and_then(|h| h.parse::<ConnHandle>().ok());
    match head {
        "connect" => handle(parts.next()).map(SimEvent::Connect),
        "disconnect" => handle(parts.next()).map(SimEvent::Disconnect),
        "write" => {
            let conn = handle(parts.next())?;
            Some(SimEvent::Write(conn, payload(parts.next().unwrap_or(""))))
        }
        "notify" => {
            let rest = line.trim().strip_prefix("notify").unwrap_or("").trim_start();
            Some(SimEvent::Notify(payload(rest)))
        }
        "close" => Some(SimEvent::Close),
        "quit" => Some(SimEvent::Quit),
        "" => None,
        _ => Some(SimEvent::Write(peer, payload(line))),
    }
}

/// Feed stdin lines into the event channel from a plain OS thread.
fn spawn_stdin_reader(peer: ConnHandle) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) => {
                    error!(%error, "stdin read failed");
                    break;
                }
            };
            let Some(event) = parse_sim_line(&line, peer) else {
                warn!(line = %line, "unrecognized simulator input");
                continue;
            };
            let quit = matches!(event, SimEvent::Quit);
            embassy_futures::block_on(SIM_EVENTS.send(event));
            if quit {
                return;
            }
        }
        embassy_futures::block_on(SIM_EVENTS.send(SimEvent::Quit));
    });
}

#[embassy_executor::task]
async fn ble_task(mut service: Service) {
    loop {
        match SIM_EVENTS.receive().await {
            SimEvent::Connect(conn) => service.on_event(BleEvent::Connect(conn)),
            SimEvent::Disconnect(conn) => service.on_event(BleEvent::Disconnect(conn)),
            SimEvent::Write(conn, data) => {
                let attr = service.rx_handle();
                service.on_event(BleEvent::Write {
                    conn,
                    attr,
                    data: &data,
                });
            }
            SimEvent::Notify(data) => service.notify(&data),
            SimEvent::Close => service.close(),
            SimEvent::Quit => {
                service.close();
                STOP.signal(());
                break;
            }
        }
    }
}

#[embassy_executor::task]
async fn control_task(mut control: Control) {
    control.run(&STOP).await;
    if let Err(error) = control.actuators_mut().stop_all() {
        error!(?error, "failed to stop motors");
    }
    info!("shutting down");
    std::process::exit(0);
}

#[embassy_executor::task]
async fn main_task(
    spawner: Spawner,
    config: RoverConfig,
    peer: ConnHandle,
) {
    let decoder = CommandDecoder::new(&COMMAND_MAILBOX);
    let service: Service = match UartService::new(SimStack, decoder, &config) {
        Ok(service) => service,
        Err(error) => {
            error!(?error, "failed to bring up BLE UART service");
            std::process::exit(1);
        }
    };

    let motors = [
        LogPwm::new("IN1", config.motor_pwm_hz),
        LogPwm::new("IN2", config.motor_pwm_hz),
        LogPwm::new("IN3", config.motor_pwm_hz),
        LogPwm::new("IN4", config.motor_pwm_hz),
    ];
    let servo = LogPwm::new("SERVO", config.servo_pwm_hz);
    info!(
        angle = config.initial_servo_angle,
        duty = config.initial_servo_duty(),
        "servo idle until first SERVO command"
    );
    let mut actuators = Actuators::new(motors, servo);
    if let Err(error) = actuators.stop_all() {
        error!(?error, "failed to zero motors");
    }
    let control = ControlLoop::new(&COMMAND_MAILBOX, actuators, config.control_period());

    spawner.must_spawn(ble_task(service));
    spawner.must_spawn(control_task(control));

    info!(peer, "reading simulated BLE events from stdin");
    spawn_stdin_reader(peer);
}

fn load_config(opts: &Opts) -> RoverConfig {
    let mut config = match &opts.config {
        Some(path) => match std::fs::read(path).map(|bytes| RoverConfig::from_json(&bytes)) {
            Ok(Ok(config)) => config,
            Ok(Err(error)) => {
                warn!(%error, path = %path.display(), "invalid config, using defaults");
                RoverConfig::default()
            }
            Err(error) => {
                warn!(%error, path = %path.display(), "cannot read config, using defaults");
                RoverConfig::default()
            }
        },
        None => RoverConfig::default(),
    };
    if let Some(period_ms) = opts.period_ms {
        config.control_period_ms = period_ms;
    }
    config
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let config = load_config(&opts);
    if opts.print_config {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{json}"),
            Err(error) => error!(%error, "failed to serialize config"),
        }
        return;
    }

    let peer = opts.peer;
    let executor = mk_static!(Executor, Executor::new());
    executor.run(move |spawner| {
        spawner.must_spawn(main_task(spawner, config, peer));
    });
}

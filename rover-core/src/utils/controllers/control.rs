//! Fixed-period control loop.
//!
//! Each period the loop samples the newest command from the mailbox, maps it
//! through [`motion::drive`](super::motion::drive) and writes the result to the
//! actuators. Commands that arrive between two ticks collapse to the last one.

use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::RawMutex, signal::Signal};
use embassy_time::{Duration, Timer};
use embedded_hal::pwm::SetDutyCycle;

use super::{
    command::CommandMailbox,
    motion::{self, MotionOutput},
    Actuators,
};

pub struct ControlLoop<'a, M: RawMutex, PM, PS> {
    mailbox: &'a CommandMailbox<M>,
    actuators: Actuators<PM, PS>,
    period: Duration,
    ticks: u64,
}

impl<'a, M, PM, PS> ControlLoop<'a, M, PM, PS>
where
    M: RawMutex,
    PM: SetDutyCycle,
    PS: SetDutyCycle,
{
    pub fn new(
        mailbox: &'a CommandMailbox<M>,
        actuators: Actuators<PM, PS>,
        period: Duration,
    ) -> Self {
        ControlLoop {
            mailbox,
            actuators,
            period,
            ticks: 0,
        }
    }

    /// Run one iteration of the loop body and return what was applied.
    pub fn tick(&mut self) -> MotionOutput {
        let (command, fresh) = self.mailbox.take();
        let output = motion::drive(command);
        self.ticks = self.ticks.wrapping_add(1);

        if fresh {
            tracing::debug!(
                action = command.action.as_str(),
                magnitude = command.magnitude,
                ?output,
                "applying new command"
            );
        } else {
            tracing::trace!(tick = self.ticks, ?output, "re-applying command");
        }

        if let Some(state) = output.motors {
            if let Err(error) = self.actuators.apply_motors(&state) {
                tracing::error!(?error, "failed to apply motor duties");
            }
        }
        if let Some(duty) = output.servo {
            if let Err(error) = self.actuators.apply_servo(duty) {
                tracing::error!(?error, "failed to apply servo duty");
            }
        }
        output
    }

    /// Tick every `period` until `stop` is signalled.
    ///
    /// The timer wait is the only suspension point.
    pub async fn run<R: RawMutex>(
        &mut self,
        stop: &Signal<R, ()>,
    ) {
        tracing::info!(period_ms = self.period.as_millis(), "control loop started");
        loop {
            match select(Timer::after(self.period), stop.wait()).await {
                Either::First(()) => {
                    self.tick();
                }
                Either::Second(()) => break,
            }
        }
        tracing::info!(ticks = self.ticks, "control loop stopped");
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn actuators_mut(&mut self) -> &mut Actuators<PM, PS> {
        &mut self.actuators
    }

    pub fn into_actuators(self) -> Actuators<PM, PS> {
        self.actuators
    }
}

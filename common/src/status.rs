use log::{debug, warn};

use crate::{
    periodic::{GateMode, PeriodicTask},
    ports::{Clock, Connection, Indicator, SensorReader},
    types::{Reading, SensorError},
};

#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Sent(Reading),
    /// Nothing was written; the client keeps its previous reading.
    SensorFailed(SensorError),
    WriteFailed(String),
}

#[derive(Debug, Clone)]
pub struct StatusTask {
    schedule: PeriodicTask,
    settle_ms: u32,
}

impl StatusTask {
    pub fn new(interval_secs: u32, mode: GateMode, settle_ms: u32) -> Self {
        Self {
            schedule: PeriodicTask::new(interval_secs, mode),
            settle_ms,
        }
    }

    pub fn schedule(&self) -> &PeriodicTask {
        &self.schedule
    }

    /// A new client should wait a full interval for its first line.
    pub fn rearm(&mut self, now: i64) {
        self.schedule.rearm(now);
    }

    pub fn run(
        &mut self,
        now: i64,
        clock: &dyn Clock,
        sensor: &mut dyn SensorReader,
        indicator: &mut dyn Indicator,
        connection: &mut dyn Connection,
    ) -> Option<StatusOutcome> {
        if !self.schedule.poll(now) {
            return None;
        }

        indicator.set(true);

        let outcome = match sensor.read() {
            Ok(reading) => {
                let line = reading.to_string();
                match connection.write_line(&line) {
                    Ok(()) => {
                        debug!("sent status: {line}");
                        StatusOutcome::Sent(reading)
                    }
                    Err(err) => {
                        warn!("failed to write status to client: {err}");
                        StatusOutcome::WriteFailed(err.to_string())
                    }
                }
            }
            Err(err) => {
                warn!("skipping status push: {err}");
                StatusOutcome::SensorFailed(err)
            }
        };
        self.schedule.mark_fired(now);

        // Keep the READ LED visible for a moment.
        clock.delay_ms(self.settle_ms);
        indicator.set(false);

        Some(outcome)
    }
}

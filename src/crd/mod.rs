mod database;
mod dormant_database;
mod redis;

pub use database::*;
pub use dormant_database::*;
pub use redis::*;

/// Status types that carry a lifecycle phase and a reason.
pub trait PhaseStatus {
    fn phase(&self) -> Option<DatabasePhase>;
    fn set_phase(&mut self, phase: DatabasePhase);
    fn set_reason(&mut self, reason: Option<String>);
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

impl PhaseStatus for RedisStatus {
    fn phase(&self) -> Option<DatabasePhase> {
        self.phase
    }

    fn set_phase(&mut self, phase: DatabasePhase) {
        self.phase = Some(phase);
    }

    fn set_reason(&mut self, reason: Option<String>) {
        self.reason = reason;
    }

    fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.observed_generation = generation;
    }
}

impl PhaseStatus for DormantDatabaseStatus {
    fn phase(&self) -> Option<DatabasePhase> {
        self.phase
    }

    fn set_phase(&mut self, phase: DatabasePhase) {
        self.phase = Some(phase);
    }

    fn set_reason(&mut self, reason: Option<String>) {
        self.reason = reason;
    }

    fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.observed_generation = generation;
    }
}

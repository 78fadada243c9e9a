//! Current telemetry snapshot per machine
//!
//! Each machine worker owns one [`MachineStateStore`] and is the only writer
//! for the machines pinned to it, so the store needs no locking. Snapshots
//! are loaded from storage on first use and cached afterwards; the cache is
//! only updated once storage has accepted the new snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace};

use crate::error::{IngestError, with_timeout};
use crate::storage::StorageBackend;
use crate::telemetry::{Field, StateUpdate, UsageReading};
use crate::{FieldClock, MachineId, MachineTelemetryState, UsageEvent};

/// Result of applying a single-field update
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The update was newer than the stored value and has been persisted
    Applied {
        previous: MachineTelemetryState,
        current: MachineTelemetryState,
    },

    /// A newer reading for this field was already applied; nothing changed
    Stale { current: MachineTelemetryState },
}

impl ApplyOutcome {
    pub fn current(&self) -> &MachineTelemetryState {
        match self {
            ApplyOutcome::Applied { current, .. } | ApplyOutcome::Stale { current } => current,
        }
    }
}

pub struct MachineStateStore {
    backend: Arc<dyn StorageBackend>,
    cache: HashMap<MachineId, MachineTelemetryState>,
    timeout: Duration,
}

impl MachineStateStore {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            cache: HashMap::new(),
            timeout,
        }
    }

    /// Load the snapshot of a machine, creating an empty one for a registered
    /// machine that never reported before
    ///
    /// Unknown machines are not cached, so registering one later takes effect
    /// with its next message.
    async fn load(
        &mut self,
        machine_id: MachineId,
        now: DateTime<Utc>,
    ) -> Result<MachineTelemetryState, IngestError> {
        if let Some(state) = self.cache.get(&machine_id) {
            return Ok(state.clone());
        }

        let record = with_timeout(
            self.timeout,
            machine_id,
            "load machine",
            self.backend.get_machine(machine_id),
        )
        .await?
        .ok_or(IngestError::UnknownMachine { machine_id })?;

        let state = record.state.unwrap_or_else(|| {
            debug!("creating telemetry state for machine {machine_id}");
            MachineTelemetryState::new(machine_id, now)
        });

        self.cache.insert(machine_id, state.clone());
        Ok(state)
    }

    /// Apply one field update observed at `observed_at`
    ///
    /// Updates older than the last applied value of the same field are
    /// reported as [`ApplyOutcome::Stale`]. Updates with an equal timestamp
    /// are applied.
    #[instrument(skip(self), fields(field = ?update.field()))]
    pub async fn apply_metric(
        &mut self,
        machine_id: MachineId,
        update: StateUpdate,
        observed_at: DateTime<Utc>,
    ) -> Result<ApplyOutcome, IngestError> {
        let previous = self.load(machine_id, observed_at).await?;

        let field = update.field();
        if let Some(applied_at) = *clock_slot(&previous.clock, field) {
            if observed_at < applied_at {
                trace!("ignoring {field:?} update from {observed_at}, already have {applied_at}");
                return Ok(ApplyOutcome::Stale { current: previous });
            }
        }

        let mut current = previous.clone();
        match update {
            StateUpdate::Temperature(value) => current.temperature_c = Some(value),
            StateUpdate::WaterLevel(value) => current.water_level_pct = Some(value),
            StateUpdate::MilkLevel(value) => current.milk_level_pct = Some(value),
            StateUpdate::BeansLevel(value) => current.beans_level_pct = Some(value),
            StateUpdate::Status(value) => current.status = value,
        }
        *clock_slot_mut(&mut current.clock, field) = Some(observed_at);
        current.last_updated = current.last_updated.max(observed_at);

        let saved = with_timeout(
            self.timeout,
            machine_id,
            "save machine state",
            self.backend.save_machine_state(&current),
        )
        .await;

        if let Err(err) = saved {
            if matches!(err, IngestError::UnknownMachine { .. }) {
                self.cache.remove(&machine_id);
            }
            return Err(err);
        }

        self.cache.insert(machine_id, current.clone());
        Ok(ApplyOutcome::Applied { previous, current })
    }

    /// Append a brew to the usage log
    ///
    /// Brews do not touch the snapshot, but the machine must be registered.
    #[instrument(skip(self, reading), fields(brew_type = %reading.brew_type))]
    pub async fn record_usage(
        &mut self,
        machine_id: MachineId,
        reading: UsageReading,
        observed_at: DateTime<Utc>,
    ) -> Result<UsageEvent, IngestError> {
        self.load(machine_id, observed_at).await?;

        let event = UsageEvent {
            machine_id,
            brew_type: reading.brew_type,
            volume_ml: reading.volume_ml,
            temp_at_brew_c: reading.temp_at_brew_c,
            timestamp: observed_at,
        };

        with_timeout(
            self.timeout,
            machine_id,
            "append usage",
            self.backend.append_usage(&event),
        )
        .await?;

        Ok(event)
    }

    /// Cached snapshot, if the machine has been loaded
    pub fn cached(&self, machine_id: MachineId) -> Option<&MachineTelemetryState> {
        self.cache.get(&machine_id)
    }
}

fn clock_slot(clock: &FieldClock, field: Field) -> &Option<DateTime<Utc>> {
    match field {
        Field::Temperature => &clock.temperature,
        Field::WaterLevel => &clock.water_level,
        Field::MilkLevel => &clock.milk_level,
        Field::BeansLevel => &clock.beans_level,
        Field::Status => &clock.status,
    }
}

fn clock_slot_mut(clock: &mut FieldClock, field: Field) -> &mut Option<DateTime<Utc>> {
    match field {
        Field::Temperature => &mut clock.temperature,
        Field::WaterLevel => &mut clock.water_level,
        Field::MilkLevel => &mut clock.milk_level,
        Field::BeansLevel => &mut clock.beans_level,
        Field::Status => &mut clock.status,
    }
}

/*!
Versioned migration chains.

A [`MigrationManager`] maps a version number to the [`Migration`] that
produces it. Moving data from version `a` to version `b` runs every
migration in `(min(a, b), max(a, b)]`: ascending through `up` when moving
forward, descending through `down` when rolling back.
*/

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::observability::record_migration;
use crate::{Result, StowageError, Value};

/// A single migration transform
pub type MigrationFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
/// A pre-step check on the data about to be migrated
pub type ValidateFn = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Step that produces `version` from `version - 1`, and optionally undoes it
#[derive(Clone)]
pub struct Migration {
    pub version: u32,
    pub up: MigrationFn,
    pub down: Option<MigrationFn>,
    pub validate: Option<ValidateFn>,
}

impl Migration {
    pub fn new<F>(version: u32, up: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            version,
            up: Arc::new(up),
            down: None,
            validate: None,
        }
    }

    pub fn with_down<F>(mut self, down: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.down = Some(Arc::new(down));
        self
    }

    pub fn with_validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("has_down", &self.down.is_some())
            .field("has_validate", &self.validate.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    Down,
}

impl MigrationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "up",
            MigrationDirection::Down => "down",
        }
    }
}

/// Data moving through a plan; each step's output is the next step's `data`
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationContext {
    pub from_version: u32,
    pub to_version: u32,
    pub data: Value,
    pub metadata: Option<Value>,
}

impl MigrationContext {
    pub fn new(data: Value, from_version: u32, to_version: u32) -> Self {
        Self {
            from_version,
            to_version,
            data,
            metadata: None,
        }
    }
}

/// Ordered steps from one version to another
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub from_version: u32,
    pub to_version: u32,
    pub direction: MigrationDirection,
    pub steps: Vec<Migration>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Versions touched by the plan, in execution order
    pub fn versions(&self) -> Vec<u32> {
        self.steps.iter().map(|m| m.version).collect()
    }
}

/// A completed migration step
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub version: u32,
    pub direction: MigrationDirection,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of [`MigrationManager::validate_migration_chain`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub gaps: Vec<u32>,
    pub missing_down: Vec<u32>,
    pub starts_at_one: bool,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.gaps.is_empty() && self.missing_down.is_empty() && self.starts_at_one
    }

    /// Human-readable problems, empty when the chain is valid
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.starts_at_one {
            problems.push("migration chain does not start at version 1".to_string());
        }
        for version in &self.gaps {
            problems.push(format!("missing migration for version {version}"));
        }
        for version in &self.missing_down {
            problems.push(format!("migration {version} has no rollback"));
        }
        problems
    }
}

#[derive(Debug, Default)]
pub struct MigrationManager {
    migrations: BTreeMap<u32, Migration>,
    history: parking_lot::Mutex<Vec<MigrationRecord>>,
}

impl MigrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_migrations<I: IntoIterator<Item = Migration>>(migrations: I) -> Self {
        let mut manager = Self::new();
        for migration in migrations {
            manager.register(migration);
        }
        manager
    }

    /// Register a migration, replacing any with the same version
    pub fn register(&mut self, migration: Migration) {
        debug!(version = migration.version, "Registered migration");
        self.migrations.insert(migration.version, migration);
    }

    pub fn get_migration(&self, version: u32) -> Option<&Migration> {
        self.migrations.get(&version)
    }

    pub fn versions(&self) -> Vec<u32> {
        self.migrations.keys().copied().collect()
    }

    /// Highest registered version, 0 when empty
    pub fn latest_version(&self) -> u32 {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Select the steps between two versions
    ///
    /// Fails up front when a rollback would pass through a migration that
    /// has no `down`.
    pub fn create_migration_plan(&self, from: u32, to: u32) -> Result<MigrationPlan> {
        let (low, high) = (from.min(to), from.max(to));
        let mut steps: Vec<Migration> = self
            .migrations
            .range((Bound::Excluded(low), Bound::Included(high)))
            .map(|(_, m)| m.clone())
            .collect();

        let direction = if to < from {
            steps.reverse();
            if let Some(missing) = steps.iter().find(|m| m.down.is_none()) {
                return Err(StowageError::migration(
                    from,
                    to,
                    StowageError::validation(format!(
                        "migration {} has no rollback",
                        missing.version
                    )),
                ));
            }
            MigrationDirection::Down
        } else {
            MigrationDirection::Up
        };

        Ok(MigrationPlan {
            from_version: from,
            to_version: to,
            direction,
            steps,
        })
    }

    /// Run a plan over the context's data
    ///
    /// Each step's `validate` runs against the data before the step. The
    /// first failure aborts the plan; steps already run stay in the history.
    pub fn execute_migration_plan(
        &self,
        plan: &MigrationPlan,
        context: MigrationContext,
    ) -> Result<Value> {
        let mut data = context.data;
        for step in &plan.steps {
            let outcome = (|| {
                if let Some(validate) = &step.validate {
                    validate(&data)?;
                }
                let transform = match plan.direction {
                    MigrationDirection::Up => Some(&step.up),
                    MigrationDirection::Down => step.down.as_ref(),
                };
                let transform = transform.ok_or_else(|| {
                    StowageError::validation(format!("migration {} has no rollback", step.version))
                })?;
                transform(std::mem::take(&mut data))
            })();

            match outcome {
                Ok(next) => data = next,
                Err(e) => {
                    return Err(StowageError::migration(
                        plan.from_version,
                        plan.to_version,
                        e,
                    ))
                }
            }

            record_migration(plan.direction.as_str());
            self.history.lock().push(MigrationRecord {
                version: step.version,
                direction: plan.direction,
                applied_at: Utc::now(),
            });
            debug!(
                version = step.version,
                direction = plan.direction.as_str(),
                "Applied migration step"
            );
        }

        if !plan.is_empty() {
            info!(
                from = plan.from_version,
                to = plan.to_version,
                steps = plan.steps.len(),
                "Migration plan completed"
            );
        }
        Ok(data)
    }

    /// Plan and run in one call
    pub fn migrate(&self, data: Value, from: u32, to: u32) -> Result<Value> {
        if from == to {
            return Ok(data);
        }
        let plan = self.create_migration_plan(from, to)?;
        self.execute_migration_plan(&plan, MigrationContext::new(data, from, to))
    }

    /// Completed steps, oldest first
    pub fn history(&self) -> Vec<MigrationRecord> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Report gaps, missing rollbacks and a chain not starting at 1
    pub fn validate_migration_chain(&self) -> ChainReport {
        let versions = self.versions();
        let Some(&last) = versions.last() else {
            return ChainReport {
                starts_at_one: true,
                ..Default::default()
            };
        };

        let gaps = (1..=last)
            .filter(|v| !self.migrations.contains_key(v))
            .collect();
        let missing_down = self
            .migrations
            .values()
            .filter(|m| m.down.is_none())
            .map(|m| m.version)
            .collect();

        ChainReport {
            gaps,
            missing_down,
            starts_at_one: versions.first() == Some(&1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Migration `v` appends `v` to `steps` and undoes it on the way down
    fn step(version: u32) -> Migration {
        Migration::new(version, move |mut data| {
            if let Value::Object(map) = &mut data {
                if let Some(Value::Array(steps)) = map.get_mut("steps") {
                    steps.push(Value::from(version as i64));
                }
            }
            Ok(data)
        })
        .with_down(move |mut data| {
            if let Value::Object(map) = &mut data {
                if let Some(Value::Array(steps)) = map.get_mut("steps") {
                    if steps.last().and_then(Value::as_i64) != Some(version as i64) {
                        return Err(StowageError::validation("rollback out of order"));
                    }
                    steps.pop();
                }
            }
            Ok(data)
        })
    }

    fn chain(versions: std::ops::RangeInclusive<u32>) -> MigrationManager {
        MigrationManager::with_migrations(versions.map(step))
    }

    fn start() -> Value {
        Value::object([("steps", Value::Array(vec![]))])
    }

    #[test]
    fn test_plan_selects_half_open_range() {
        let manager = chain(1..=5);
        let forward = manager.create_migration_plan(2, 5).unwrap();
        assert_eq!(forward.versions(), vec![3, 4, 5]);
        assert_eq!(forward.direction, MigrationDirection::Up);

        let back = manager.create_migration_plan(5, 2).unwrap();
        assert_eq!(back.versions(), vec![5, 4, 3]);
        assert_eq!(back.direction, MigrationDirection::Down);

        assert!(manager.create_migration_plan(3, 3).unwrap().is_empty());
    }

    #[test]
    fn test_plan_at_highest_version() {
        let manager = MigrationManager::with_migrations([step(u32::MAX)]);
        assert!(manager
            .create_migration_plan(u32::MAX, u32::MAX)
            .unwrap()
            .is_empty());
        assert_eq!(
            manager
                .create_migration_plan(u32::MAX - 1, u32::MAX)
                .unwrap()
                .versions(),
            vec![u32::MAX]
        );
    }

    #[test]
    fn test_forward_then_rollback_round_trip() {
        let manager = chain(1..=5);
        let data = manager.migrate(start(), 0, 2).unwrap();

        let upgraded = manager.migrate(data.clone(), 2, 5).unwrap();
        let steps = upgraded.get("steps").and_then(Value::as_array).unwrap();
        assert_eq!(steps, &(1..=5i64).map(Value::from).collect::<Vec<_>>());

        let restored = manager.migrate(upgraded, 5, 2).unwrap();
        assert_eq!(restored, data);

        let directions: Vec<_> = manager
            .history()
            .iter()
            .map(|r| (r.version, r.direction))
            .collect();
        assert_eq!(
            directions,
            vec![
                (1, MigrationDirection::Up),
                (2, MigrationDirection::Up),
                (3, MigrationDirection::Up),
                (4, MigrationDirection::Up),
                (5, MigrationDirection::Up),
                (5, MigrationDirection::Down),
                (4, MigrationDirection::Down),
                (3, MigrationDirection::Down),
            ]
        );
    }

    #[test]
    fn test_rollback_without_down_fails_before_running() {
        let mut manager = chain(1..=3);
        manager.register(Migration::new(4, Ok));

        let err = manager.migrate(start(), 4, 1).unwrap_err();
        assert!(matches!(
            err,
            StowageError::Migration {
                from_version: 4,
                to_version: 1,
                ..
            }
        ));
        assert!(manager.history().is_empty());
    }

    #[test]
    fn test_validate_failure_aborts_with_cause() {
        let mut manager = chain(1..=2);
        manager.register(
            Migration::new(3, Ok).with_validate(|data| match data.get("steps") {
                Some(Value::Array(steps)) if steps.len() == 2 => Err(StowageError::validation(
                    "refusing to migrate",
                )),
                _ => Ok(()),
            }),
        );

        let err = manager.migrate(start(), 0, 3).unwrap_err();
        match err {
            StowageError::Migration {
                from_version,
                to_version,
                source,
            } => {
                assert_eq!((from_version, to_version), (0, 3));
                assert_eq!(source.code(), "VALIDATION_ERROR");
            }
            other => panic!("Expected Migration error, got {other:?}"),
        }
        // only completed steps are recorded
        assert_eq!(
            manager.history().iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_failing_step_wraps_error() {
        let manager = MigrationManager::with_migrations([Migration::new(1, |_| {
            Err(StowageError::validation("boom"))
        })]);
        let err = manager.migrate(Value::Null, 0, 1).unwrap_err();
        assert_eq!(err.code(), "MIGRATION_ERROR");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_chain_report() {
        let complete = chain(1..=4);
        assert!(complete.validate_migration_chain().is_valid());

        let mut broken = MigrationManager::new();
        broken.register(step(2));
        broken.register(Migration::new(4, Ok));
        let report = broken.validate_migration_chain();
        assert_eq!(report.gaps, vec![1, 3]);
        assert_eq!(report.missing_down, vec![4]);
        assert!(!report.starts_at_one);
        assert_eq!(report.problems().len(), 4);

        // gaps do not block forward use
        assert!(broken.migrate(start(), 0, 4).is_ok());
    }

    #[test]
    fn test_empty_manager() {
        let manager = MigrationManager::new();
        assert_eq!(manager.latest_version(), 0);
        assert!(manager.validate_migration_chain().is_valid());
        assert_eq!(manager.migrate(Value::from(1i64), 0, 3).unwrap(), Value::from(1i64));
    }
}

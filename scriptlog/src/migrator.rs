use crate::core::{
    horizontal_line, Change, ChangelogStore, ConnectionProvider, MigrationSource,
    ScriptExecutor, Transactional,
};
use crate::error::{Error, MigrationError};
use crate::hook::{HookContext, MigrationHook};
use crate::reconcile::{compute_newer, compute_pending};
use crate::status::StatusReport;
use chrono::Utc;
use std::io::Write;
use std::time::Instant;

const NOTICE_WIDTH: usize = 80;

const OUT_OF_ORDER_WARNING: &str =
    "WARNING: Running pending migrations out of order can create unexpected results.";

/// The entrypoint for reconciling and applying change scripts.
///
/// A migrator ties together where the scripts come from ([MigrationSource]), where the
/// applied changes are recorded ([ChangelogStore]), how a script is executed
/// ([ScriptExecutor]) and how to reach the target database ([ConnectionProvider]).
/// By default the changelog lives on the target database; see
/// [Migrator::with_changelog_connection_provider] to keep it elsewhere.
///
/// A migrator takes no locks: two processes applying the same changes against the same
/// database at once will both try to apply them.
pub struct Migrator<C> {
    connection_provider: Box<dyn ConnectionProvider<Connection = C>>,
    changelog_connection_provider: Option<Box<dyn ConnectionProvider<Connection = C>>>,
    source: Box<dyn MigrationSource>,
    changelog: Box<dyn ChangelogStore<C>>,
    runner: Box<dyn ScriptExecutor<C>>,
    hook: Option<Box<dyn MigrationHook<C>>>,
}

// Manual Debug impl since the collaborators are trait objects
impl<C> std::fmt::Debug for Migrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field(
                "changelog_connection_provider",
                &self.changelog_connection_provider.is_some(),
            )
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Transactional> Migrator<C> {
    /// A migrator that keeps the changelog on the target database and has no hook.
    pub fn new(
        connection_provider: impl ConnectionProvider<Connection = C> + 'static,
        source: impl MigrationSource + 'static,
        changelog: impl ChangelogStore<C> + 'static,
        runner: impl ScriptExecutor<C> + 'static,
    ) -> Self {
        Self {
            connection_provider: Box::new(connection_provider),
            changelog_connection_provider: None,
            source: Box::new(source),
            changelog: Box::new(changelog),
            runner: Box::new(runner),
            hook: None,
        }
    }

    /// Keep the changelog in a different database than the one the scripts run against.
    /// Recording a change then happens after the script's own transaction has committed.
    pub fn with_changelog_connection_provider(
        mut self,
        provider: impl ConnectionProvider<Connection = C> + 'static,
    ) -> Self {
        self.changelog_connection_provider = Some(Box::new(provider));
        self
    }

    /// Set the hook notified around every batch.
    pub fn with_hook(mut self, hook: impl MigrationHook<C> + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Apply every change the source knows about that the changelog has no record of,
    /// in ascending id order, including changes older than ones already applied.
    ///
    /// Fails with [MigrationError::ChangelogMissing] before anything runs if the changelog
    /// does not exist. Any other failure stops the batch: changes applied before it stay
    /// recorded, the failing change is not recorded, and later changes are not attempted.
    /// Returns the changes applied.
    pub fn pending(&self, out: &mut dyn Write) -> Result<Vec<Change>, MigrationError> {
        self.with_session(|target, changelog_conn| {
            let applied = {
                let log = changelog_connection(target, changelog_conn);
                if !self.changelog.exists(log)? {
                    return Err(MigrationError::ChangelogMissing);
                }
                self.changelog.read_all(log)?
            };
            let pending = compute_pending(self.source.list_all()?, &applied);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                recorded = applied.len(),
                pending = ?pending.iter().map(|c| c.id).collect::<Vec<_>>(),
                "Reconciled changelog against source"
            );

            if !pending.is_empty() {
                notice(out, OUT_OF_ORDER_WARNING)?;
            }
            self.apply_changes(target, changelog_conn, &pending, out)?;
            Ok(pending)
        })
    }

    /// Apply the changes newer than the newest recorded change, in ascending id order,
    /// stopping after `steps` changes if given. Creates the changelog if it is missing.
    pub fn up(
        &self,
        steps: Option<usize>,
        out: &mut dyn Write,
    ) -> Result<Vec<Change>, MigrationError> {
        self.with_session(|target, changelog_conn| {
            let applied = {
                let log = changelog_connection(target, changelog_conn);
                if self.changelog.exists(log)? {
                    self.changelog.read_all(log)?
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::info!("Changelog missing, creating it");
                    self.changelog.create(log)?;
                    Vec::new()
                }
            };
            let mut newer = compute_newer(self.source.list_all()?, &applied);
            if let Some(steps) = steps {
                newer.truncate(steps);
            }
            self.apply_changes(target, changelog_conn, &newer, out)?;
            Ok(newer)
        })
    }

    /// Report which changes are applied and which are pending, without changing anything.
    pub fn status(&self) -> Result<StatusReport, MigrationError> {
        self.with_session(|target, changelog_conn| {
            let log = changelog_connection(target, changelog_conn);
            if !self.changelog.exists(log)? {
                return Err(MigrationError::ChangelogMissing);
            }
            let applied = self.changelog.read_all(log)?;
            Ok(StatusReport::new(self.source.list_all()?, applied))
        })
    }

    /// Acquire the target connection and, if configured, the changelog connection, run `body`,
    /// then release both whatever happened.
    fn with_session<T>(
        &self,
        body: impl FnOnce(&mut C, &mut Option<C>) -> Result<T, MigrationError>,
    ) -> Result<T, MigrationError> {
        let mut target = self.connection_provider.connection()?;
        let mut changelog_conn = match &self.changelog_connection_provider {
            Some(provider) => match provider.connection() {
                Ok(conn) => Some(conn),
                Err(e) => {
                    self.release_quietly(target, None);
                    return Err(MigrationError::execution(e));
                }
            },
            None => None,
        };

        let result = body(&mut target, &mut changelog_conn);

        match result {
            Ok(value) => {
                self.release(target, changelog_conn)?;
                Ok(value)
            }
            Err(e) => {
                self.release_quietly(target, changelog_conn);
                Err(e)
            }
        }
    }

    /// Release both connections, attempting the second even if the first fails.
    fn release(&self, target: C, changelog_conn: Option<C>) -> Result<(), Error> {
        let target_released = self.connection_provider.release(target);
        let changelog_released = match (&self.changelog_connection_provider, changelog_conn) {
            (Some(provider), Some(conn)) => provider.release(conn),
            _ => Ok(()),
        };
        target_released.and(changelog_released)
    }

    fn release_quietly(&self, target: C, changelog_conn: Option<C>) {
        if let Err(_e) = self.release(target, changelog_conn) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "Failed to release connection after an error");
        }
    }

    /// Apply `changes` in the given order, notifying the hook around the batch and each change.
    fn apply_changes(
        &self,
        target: &mut C,
        changelog_conn: &mut Option<C>,
        changes: &[Change],
        out: &mut dyn Write,
    ) -> Result<(), Error> {
        let provider = self.connection_provider.as_ref();
        let runner = self.runner.as_ref();
        let hook = self.hook.as_deref();

        for (step, change) in changes.iter().enumerate() {
            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!(
                "migration_apply",
                id = change.id,
                filename = %change.display_name()
            )
            .entered();

            if let Some(hook) = hook {
                if step == 0 {
                    hook.before(HookContext::batch(provider, runner))?;
                }
                hook.before_each(HookContext::for_change(provider, runner, change))?;
            }

            notice(
                out,
                &horizontal_line(&format!("Applying: {}", change.display_name()), NOTICE_WIDTH),
            )?;

            #[cfg(feature = "tracing")]
            tracing::info!("Starting migration");
            let started = Instant::now();

            if let Err(e) = self.apply_one(target, changelog_conn, change) {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Migration failed");
                return Err(e);
            }

            let _elapsed = started.elapsed();
            #[cfg(feature = "tracing")]
            tracing::info!(
                duration_ms = _elapsed.as_millis() as u64,
                "Migration completed successfully"
            );

            notice(out, "")?;

            if let Some(hook) = hook {
                hook.after_each(HookContext::for_change(provider, runner, change))?;
            }
        }

        if !changes.is_empty() {
            if let Some(hook) = hook {
                hook.after(HookContext::batch(provider, runner))?;
            }
        }
        Ok(())
    }

    /// Run one change's script and record it.
    ///
    /// With the changelog on the target connection both happen in one transaction. With a
    /// separate changelog connection the script's transaction commits before the record is
    /// written.
    fn apply_one(
        &self,
        target: &mut C,
        changelog_conn: &mut Option<C>,
        change: &Change,
    ) -> Result<(), Error> {
        let applied_at = Utc::now();
        target.begin()?;

        let mut result = self.run_script(target, change);
        if result.is_ok() && changelog_conn.is_none() {
            result = self.changelog.record(target, change, applied_at);
        }
        let result = result.and_then(|()| target.commit());

        if let Err(e) = result {
            if let Err(_rollback_error) = target.rollback() {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_rollback_error, "Rollback failed");
            }
            return Err(e);
        }

        if let Some(log) = changelog_conn.as_mut() {
            self.changelog.record(log, change, applied_at)?;
        }
        Ok(())
    }

    fn run_script(&self, target: &mut C, change: &Change) -> Result<(), Error> {
        let mut script = self.source.open_script(change)?;
        self.runner.run_script(target, &mut *script)
    }
}

/// The connection the changelog lives on: the separate one if configured, else the target.
fn changelog_connection<'c, C>(target: &'c mut C, separate: &'c mut Option<C>) -> &'c mut C {
    match separate {
        Some(conn) => conn,
        None => target,
    }
}

fn notice(out: &mut dyn Write, line: &str) -> Result<(), Error> {
    writeln!(out, "{}", line)?;
    Ok(())
}

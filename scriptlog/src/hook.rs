//! Lifecycle hooks around a batch of applied changes.
//!
//! A hook is notified at four points: [before](MigrationHook::before) the first change of a
//! non-empty batch, [before_each](MigrationHook::before_each) and
//! [after_each](MigrationHook::after_each) around every change, and
//! [after](MigrationHook::after) the last one. A hook returning an error aborts the batch.

use crate::core::{release_after, Change, ConnectionProvider, ScriptExecutor};
use crate::error::Error;

/// What a hook gets to see. Built fresh for every call.
pub struct HookContext<'a, C> {
    connection_provider: &'a dyn ConnectionProvider<Connection = C>,
    runner: &'a dyn ScriptExecutor<C>,
    change: Option<Change>,
}

impl<'a, C> HookContext<'a, C> {
    pub(crate) fn batch(
        connection_provider: &'a dyn ConnectionProvider<Connection = C>,
        runner: &'a dyn ScriptExecutor<C>,
    ) -> Self {
        Self {
            connection_provider,
            runner,
            change: None,
        }
    }

    pub(crate) fn for_change(
        connection_provider: &'a dyn ConnectionProvider<Connection = C>,
        runner: &'a dyn ScriptExecutor<C>,
        change: &Change,
    ) -> Self {
        Self {
            connection_provider,
            runner,
            change: Some(change.clone()),
        }
    }

    /// Provider for the target database.
    pub fn connection_provider(&self) -> &'a dyn ConnectionProvider<Connection = C> {
        self.connection_provider
    }

    /// The script runner the batch uses.
    pub fn runner(&self) -> &'a dyn ScriptExecutor<C> {
        self.runner
    }

    /// The change being applied, or `None` for the batch-level `before` and `after` calls.
    pub fn change(&self) -> Option<&Change> {
        self.change.as_ref()
    }

    /// Run `sql` through the batch's runner on a fresh connection to the target database.
    pub fn execute_sql(&self, sql: &str) -> Result<(), Error> {
        let mut conn = self.connection_provider.connection()?;
        let mut script = sql.as_bytes();
        let result = self.runner.run_script(&mut conn, &mut script);
        release_after(self.connection_provider, conn, result)
    }
}

impl<C> std::fmt::Debug for HookContext<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookContext")
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

/// Observer of a batch. Every method defaults to doing nothing.
pub trait MigrationHook<C> {
    fn before(&self, _context: HookContext<'_, C>) -> Result<(), Error> {
        Ok(())
    }

    fn before_each(&self, _context: HookContext<'_, C>) -> Result<(), Error> {
        Ok(())
    }

    fn after_each(&self, _context: HookContext<'_, C>) -> Result<(), Error> {
        Ok(())
    }

    fn after(&self, _context: HookContext<'_, C>) -> Result<(), Error> {
        Ok(())
    }
}

type HookFn<C> = Box<dyn Fn(&HookContext<'_, C>) -> Result<(), Error> + Send + Sync>;

/// A hook assembled from closures.
///
/// # Example
/// ```
/// use scriptlog::hook::FnHook;
///
/// let hook: FnHook<rusqlite::Connection> = FnHook::new()
///     .on_before_each(|context| {
///         if let Some(change) = context.change() {
///             println!("about to apply {}", change.id);
///         }
///         Ok(())
///     });
/// ```
pub struct FnHook<C> {
    before: Option<HookFn<C>>,
    before_each: Option<HookFn<C>>,
    after_each: Option<HookFn<C>>,
    after: Option<HookFn<C>>,
}

impl<C> FnHook<C> {
    /// A hook with no callbacks.
    pub fn new() -> Self {
        Self {
            before: None,
            before_each: None,
            after_each: None,
            after: None,
        }
    }

    /// Call `callback` before the first change of a batch.
    pub fn on_before<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HookContext<'_, C>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.before = Some(Box::new(callback));
        self
    }

    /// Call `callback` before each change.
    pub fn on_before_each<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HookContext<'_, C>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.before_each = Some(Box::new(callback));
        self
    }

    /// Call `callback` after each change is applied and recorded.
    pub fn on_after_each<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HookContext<'_, C>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.after_each = Some(Box::new(callback));
        self
    }

    /// Call `callback` after the last change of a batch.
    pub fn on_after<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HookContext<'_, C>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.after = Some(Box::new(callback));
        self
    }

    fn call(callback: &Option<HookFn<C>>, context: HookContext<'_, C>) -> Result<(), Error> {
        match callback {
            Some(callback) => callback(&context),
            None => Ok(()),
        }
    }
}

impl<C> Default for FnHook<C> {
    fn default() -> Self {
        Self::new()
    }
}

// Manual Debug impl since closures don't implement Debug
impl<C> std::fmt::Debug for FnHook<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHook")
            .field("before", &self.before.is_some())
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

impl<C> MigrationHook<C> for FnHook<C> {
    fn before(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::call(&self.before, context)
    }

    fn before_each(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::call(&self.before_each, context)
    }

    fn after_each(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::call(&self.after_each, context)
    }

    fn after(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::call(&self.after, context)
    }
}

/// A hook that runs SQL at each lifecycle point.
///
/// In the per-change scripts, `${id}`, `${description}` and `${filename}` are replaced with
/// the change's values before the script runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptHook {
    before: Option<String>,
    before_each: Option<String>,
    after_each: Option<String>,
    after: Option<String>,
}

impl ScriptHook {
    /// A hook with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL run before the first change of a batch.
    pub fn with_before(mut self, sql: impl Into<String>) -> Self {
        self.before = Some(sql.into());
        self
    }

    /// SQL run before each change.
    pub fn with_before_each(mut self, sql: impl Into<String>) -> Self {
        self.before_each = Some(sql.into());
        self
    }

    /// SQL run after each change.
    pub fn with_after_each(mut self, sql: impl Into<String>) -> Self {
        self.after_each = Some(sql.into());
        self
    }

    /// SQL run after the last change of a batch.
    pub fn with_after(mut self, sql: impl Into<String>) -> Self {
        self.after = Some(sql.into());
        self
    }

    fn run<C>(script: &Option<String>, context: HookContext<'_, C>) -> Result<(), Error> {
        let Some(script) = script else {
            return Ok(());
        };
        let sql = match context.change() {
            Some(change) => substitute(script, change),
            None => script.clone(),
        };
        context.execute_sql(&sql)
    }
}

fn substitute(script: &str, change: &Change) -> String {
    script
        .replace("${id}", &change.id.to_string())
        .replace("${description}", &change.description)
        .replace("${filename}", change.filename.as_deref().unwrap_or(""))
}

impl<C> MigrationHook<C> for ScriptHook {
    fn before(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::run(&self.before, context)
    }

    fn before_each(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::run(&self.before_each, context)
    }

    fn after_each(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::run(&self.after_each, context)
    }

    fn after(&self, context: HookContext<'_, C>) -> Result<(), Error> {
        Self::run(&self.after, context)
    }
}

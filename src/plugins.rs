//! Session hooks compiled into the binary
//!
//! A plugin is selected with `name` or `name|key=value,flag` and may look
//! at (and annotate) every session before and after the filter runs.

pub mod counter;
pub mod netcount;
pub mod stats;

use crate::parser::Session;
use crate::request::FieldRequest;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

pub use netcount::NetCount;
pub use stats::SessionStats;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Unknown plugin: '{0}'")]
    Unknown(String),

    #[error("Plugin '{plugin}' does not accept parameter '{parameter}'")]
    UnknownParameter { plugin: String, parameter: String },

    #[error("Plugin '{plugin}': invalid value '{value}' for '{parameter}'")]
    InvalidParameter {
        plugin: String,
        parameter: String,
        value: String,
    },
}

/// Hook callbacks; returning `true` hides the session from the output
pub trait SessionHook: Send + Sync {
    fn name(&self) -> &str;

    fn before_filter(&self, _session: &mut Session) -> bool {
        false
    }

    /// Only called for sessions the filter accepted
    fn after_filter(&self, _session: &mut Session) -> bool {
        false
    }

    fn on_finished(&self) {}
}

/// Combined answer of all hooks for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    Keep,
    Suppress,
    /// A hook panicked; the session is suppressed too
    Fault,
}

/// Parameters after the `|` of a plugin spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginArgs {
    plugin: String,
    values: BTreeMap<String, Option<String>>,
}

impl PluginArgs {
    pub fn parse(plugin: &str, data: &str) -> Self {
        let values = data
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| match item.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), Some(value.trim().to_string())),
                None => (item.to_string(), None),
            })
            .collect();

        PluginArgs {
            plugin: plugin.to_string(),
            values,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn flag(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_deref())
    }

    pub fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, PluginError> {
        match self.value(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| PluginError::InvalidParameter {
                plugin: self.plugin.clone(),
                parameter: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// Fails on the first key not in `known`
    pub fn allow_only(&self, known: &[&str]) -> Result<(), PluginError> {
        match self.values.keys().find(|key| !known.contains(&key.as_str())) {
            Some(key) => Err(PluginError::UnknownParameter {
                plugin: self.plugin.clone(),
                parameter: key.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Builds the plugin named in `spec`, which may add to `request`
pub fn load(spec: &str, request: &mut FieldRequest) -> Result<Box<dyn SessionHook>, PluginError> {
    let (name, data) = spec.split_once('|').unwrap_or((spec, ""));
    let name = name.trim();
    let args = PluginArgs::parse(name, data);

    match name {
        "netcount" => Ok(Box::new(NetCount::from_args(&args, request)?)),
        "stats" => Ok(Box::new(SessionStats::from_args(&args, request)?)),
        _ => Err(PluginError::Unknown(name.to_string())),
    }
}

/// All loaded hooks, run in load order
#[derive(Default)]
pub struct HookSet {
    hooks: Vec<Box<dyn SessionHook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Box<dyn SessionHook>) {
        debug!("Plugin '{}' loaded", hook.name());
        self.hooks.push(hook);
    }

    pub fn load(&mut self, spec: &str, request: &mut FieldRequest) -> Result<(), PluginError> {
        let hook = load(spec, request)?;
        self.push(hook);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    pub fn before_filter(&self, session: &mut Session) -> Verdict {
        self.run(session, "before_filter", |hook, session| hook.before_filter(session))
    }

    pub fn after_filter(&self, session: &mut Session) -> Verdict {
        self.run(session, "after_filter", |hook, session| hook.after_filter(session))
    }

    pub fn finished(&self) {
        for hook in &self.hooks {
            if panic::catch_unwind(AssertUnwindSafe(|| hook.on_finished())).is_err() {
                warn!("Plugin '{}' panicked while finishing", hook.name());
            }
        }
    }

    fn run(
        &self,
        session: &mut Session,
        stage: &str,
        call: impl Fn(&dyn SessionHook, &mut Session) -> bool,
    ) -> Verdict {
        let mut verdict = Verdict::Keep;
        for hook in &self.hooks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(hook.as_ref(), session)));
            let this = match outcome {
                Ok(false) => Verdict::Keep,
                Ok(true) => Verdict::Suppress,
                Err(_) => {
                    warn!(
                        "Plugin '{}' panicked in {} for session 0x{:x}",
                        hook.name(),
                        stage,
                        session.serial
                    );
                    Verdict::Fault
                }
            };
            verdict = verdict.max(this);
        }
        verdict
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

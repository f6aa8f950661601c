//! Scripted frontend
//!
//! Serves hand-built [`ArenaUnit`]s instead of parsing anything. Used to
//! drive the indexer through exact cursor sequences, including the awkward
//! ones a real parser produces (misreported parents, references to cursors
//! outside the visited tree, parse failures that only happen with a
//! preamble, files touched mid-parse).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::arena::ArenaUnit;
use super::{Frontend, FrontendError, PreambleInputs, PREAMBLE_FLAG};

/// Which attempts of a parse task should fail for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail only when a preamble is passed.
    WithPreamble,
    /// Fail only when no preamble is passed.
    WithoutPreamble,
    Always,
}

/// One recorded `parse` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCall {
    pub file: PathBuf,
    pub args: Vec<String>,
}

impl ParseCall {
    pub fn used_preamble(&self) -> bool {
        self.args.iter().any(|a| a == PREAMBLE_FLAG)
    }
}

type ParseHook = Box<dyn Fn(&Path, &[String]) + Send + Sync>;

/// Frontend returning pre-registered units.
#[derive(Default)]
pub struct ScriptedFrontend {
    units: RwLock<HashMap<PathBuf, ArenaUnit>>,
    failures: RwLock<HashMap<PathBuf, FailureMode>>,
    hook: Option<ParseHook>,
    calls: Mutex<Vec<ParseCall>>,
    preamble_builds: AtomicUsize,
    preamble_inputs: Mutex<Vec<PreambleInputs>>,
    preamble_delay: Option<Duration>,
}

impl ScriptedFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the unit returned when `unit.main_file()` is parsed.
    pub fn with_unit(self, unit: ArenaUnit) -> Self {
        self.insert_unit(unit);
        self
    }

    pub fn insert_unit(&self, unit: ArenaUnit) {
        self.units
            .write()
            .insert(unit.main_file().to_path_buf(), unit);
    }

    pub fn with_failure(self, file: impl Into<PathBuf>, mode: FailureMode) -> Self {
        self.failures.write().insert(file.into(), mode);
        self
    }

    /// Run `hook` inside every `parse`, before the unit is returned.
    pub fn with_parse_hook(
        mut self,
        hook: impl Fn(&Path, &[String]) + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Make preamble builds take at least `delay`.
    pub fn with_preamble_delay(mut self, delay: Duration) -> Self {
        self.preamble_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ParseCall> {
        self.calls.lock().clone()
    }

    pub fn parse_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn preamble_builds(&self) -> usize {
        self.preamble_builds.load(Ordering::SeqCst)
    }

    pub fn preamble_inputs(&self) -> Vec<PreambleInputs> {
        self.preamble_inputs.lock().clone()
    }
}

impl Frontend for ScriptedFrontend {
    type Unit = ArenaUnit;

    fn parse(&self, file: &Path, args: &[String]) -> Result<ArenaUnit, FrontendError> {
        let call = ParseCall {
            file: file.to_path_buf(),
            args: args.to_vec(),
        };
        let with_preamble = call.used_preamble();
        self.calls.lock().push(call);

        if let Some(hook) = &self.hook {
            hook(file, args);
        }

        let failing = match self.failures.read().get(file) {
            Some(FailureMode::Always) => true,
            Some(FailureMode::WithPreamble) => with_preamble,
            Some(FailureMode::WithoutPreamble) => !with_preamble,
            None => false,
        };
        if failing {
            return Err(FrontendError::parse(file, "scripted failure"));
        }

        self.units
            .read()
            .get(file)
            .cloned()
            .ok_or_else(|| FrontendError::parse(file, "no scripted unit registered"))
    }

    fn build_preamble(
        &self,
        inputs: &PreambleInputs,
        _args: &[String],
        output: &Path,
    ) -> Result<(), FrontendError> {
        self.preamble_builds.fetch_add(1, Ordering::SeqCst);
        self.preamble_inputs.lock().push(inputs.clone());
        if let Some(delay) = self.preamble_delay {
            std::thread::sleep(delay);
        }
        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let manifest = serde_json::to_vec(&inputs.all)
            .map_err(|e| FrontendError::preamble(output, e.to_string()))?;
        std::fs::write(output, manifest)?;
        Ok(())
    }
}

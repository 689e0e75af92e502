//! Deterministic simulation for tests: emits tiny solid frames, counts
//! lifecycle calls and records every input it receives.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{
    Frame, ParamsError, PixelLayout, Simulation, SimulationContext, SimulationError,
    SimulationFactory,
};
use crate::input::InputEvent;

#[derive(Debug, Clone, Default)]
pub struct ScriptedOptions {
    /// Each `next_frame` sleeps this long before returning.
    pub frame_delay: Option<Duration>,
    pub fail_start: bool,
    pub panic_on_stop: bool,
    pub panic_on_input: bool,
}

#[derive(Default)]
pub struct ScriptedSimulation {
    options: ScriptedOptions,
    running: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    frames: AtomicUsize,
    inputs: Mutex<Vec<InputEvent>>,
    params: Mutex<Value>,
}

impl ScriptedSimulation {
    pub fn new(options: ScriptedOptions) -> Self {
        Self {
            options,
            params: Mutex::new(json!({})),
            ..Default::default()
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn frames_rendered(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<InputEvent> {
        self.inputs.lock().clone()
    }

    pub fn params(&self) -> Value {
        self.params.lock().clone()
    }
}

#[async_trait]
impl Simulation for ScriptedSimulation {
    fn start(&self) -> Result<(), SimulationError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.options.fail_start {
            return Err(SimulationError::Start("scripted failure".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), SimulationError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if self.options.panic_on_stop {
            panic!("scripted panic on stop");
        }
        Ok(())
    }

    async fn next_frame(&self) -> Result<Frame, SimulationError> {
        if let Some(delay) = self.options.frame_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.running.load(Ordering::SeqCst) {
            return Err(SimulationError::Stopped);
        }
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(Frame {
            width: 2,
            height: 2,
            layout: PixelLayout::Rgb24,
            data: Bytes::from(vec![(n % 256) as u8; 12]),
        })
    }

    fn apply_input(&self, event: InputEvent) {
        if self.options.panic_on_input {
            panic!("scripted panic on input");
        }
        self.inputs.lock().push(event);
    }

    /// Accepts any object whose values are numbers.
    fn update_parameters(&self, params: Value) -> Result<(), ParamsError> {
        let Some(map) = params.as_object() else {
            return Err(ParamsError::Invalid("params must be an object".into()));
        };
        if let Some((key, _)) = map.iter().find(|(_, v)| !v.is_number()) {
            return Err(ParamsError::Invalid(format!("`{key}` must be a number")));
        }
        *self.params.lock() = params;
        Ok(())
    }
}

/// Hands out [`ScriptedSimulation`]s and keeps them so tests can inspect
/// instances created on their behalf.
#[derive(Default)]
pub struct ScriptedFactory {
    options: Mutex<ScriptedOptions>,
    created: Mutex<Vec<(SimulationContext, Arc<ScriptedSimulation>)>>,
}

impl ScriptedFactory {
    pub fn new(options: ScriptedOptions) -> Self {
        Self {
            options: Mutex::new(options),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn set_options(&self, options: ScriptedOptions) {
        *self.options.lock() = options;
    }

    pub fn instances(&self) -> Vec<Arc<ScriptedSimulation>> {
        self.created.lock().iter().map(|(_, sim)| Arc::clone(sim)).collect()
    }

    pub fn contexts(&self) -> Vec<SimulationContext> {
        self.created.lock().iter().map(|(ctx, _)| ctx.clone()).collect()
    }
}

impl SimulationFactory for ScriptedFactory {
    fn create(&self, ctx: SimulationContext) -> Result<Arc<dyn Simulation>, SimulationError> {
        let sim = Arc::new(ScriptedSimulation::new(self.options.lock().clone()));
        self.created.lock().push((ctx, Arc::clone(&sim)));
        Ok(sim)
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": { "type": "number" }
        })
    }
}

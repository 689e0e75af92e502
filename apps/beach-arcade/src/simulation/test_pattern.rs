//! Built-in simulation: a square bouncing around a gradient, steerable with
//! the arrow keys or the pointer. Renders column-major surfaces the same way
//! external engines do, so the full frame path is exercised without a GPU.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    Frame, ParamsError, PixelLayout, Simulation, SimulationContext, SimulationError,
    SimulationFactory,
};
use crate::input::{InputEvent, Key, PointerButton};

pub const CATEGORY: &str = "builtin";
pub const ID: &str = "test-pattern";

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const SQUARE: i32 = 24;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PatternParams {
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
}

fn default_speed() -> u32 {
    4
}

fn default_color() -> [u8; 3] {
    [255, 196, 0]
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            color: default_color(),
        }
    }
}

impl PatternParams {
    fn parse(raw: Value) -> Result<Self, ParamsError> {
        let params: PatternParams =
            serde_json::from_value(raw).map_err(|e| ParamsError::Invalid(e.to_string()))?;
        if !(1..=50).contains(&params.speed) {
            return Err(ParamsError::Invalid(format!(
                "speed must be between 1 and 50, got {}",
                params.speed
            )));
        }
        Ok(params)
    }
}

struct PatternState {
    running: bool,
    x: i32,
    y: i32,
    vx: i32,
    vy: i32,
    held: HashSet<Key>,
    inverted: bool,
    tick: u64,
    params: PatternParams,
}

pub struct TestPattern {
    session_id: String,
    state: Mutex<PatternState>,
}

impl TestPattern {
    pub fn new(ctx: &SimulationContext) -> Self {
        Self {
            session_id: ctx.session_id.clone(),
            state: Mutex::new(PatternState {
                running: false,
                x: (WIDTH as i32 - SQUARE) / 2,
                y: (HEIGHT as i32 - SQUARE) / 2,
                vx: 1,
                vy: 1,
                held: HashSet::new(),
                inverted: false,
                tick: 0,
                params: PatternParams::default(),
            }),
        }
    }

    pub fn params(&self) -> PatternParams {
        self.state.lock().params.clone()
    }

    fn render(state: &mut PatternState) -> Frame {
        let speed = state.params.speed as i32;
        let steer_x = held_axis(&state.held, Key::Left, Key::Right);
        let steer_y = held_axis(&state.held, Key::Up, Key::Down);
        if steer_x != 0 || steer_y != 0 {
            state.x += steer_x * speed;
            state.y += steer_y * speed;
        } else {
            state.x += state.vx * speed;
            state.y += state.vy * speed;
        }
        if state.x <= 0 || state.x >= WIDTH as i32 - SQUARE {
            state.vx = -state.vx;
        }
        if state.y <= 0 || state.y >= HEIGHT as i32 - SQUARE {
            state.vy = -state.vy;
        }
        state.x = state.x.clamp(0, WIDTH as i32 - SQUARE);
        state.y = state.y.clamp(0, HEIGHT as i32 - SQUARE);
        state.tick += 1;

        let (w, h) = (WIDTH as usize, HEIGHT as usize);
        let mut data = vec![0u8; w * h * 3];
        let shift = (state.tick % 256) as u8;
        for x in 0..w {
            for y in 0..h {
                let idx = (x * h + y) * 3;
                let inside = (x as i32) >= state.x
                    && (x as i32) < state.x + SQUARE
                    && (y as i32) >= state.y
                    && (y as i32) < state.y + SQUARE;
                let mut px = if inside {
                    state.params.color
                } else {
                    [
                        (x * 255 / w) as u8,
                        (y * 255 / h) as u8,
                        shift,
                    ]
                };
                if state.inverted {
                    px = [255 - px[0], 255 - px[1], 255 - px[2]];
                }
                data[idx..idx + 3].copy_from_slice(&px);
            }
        }

        Frame {
            width: WIDTH,
            height: HEIGHT,
            layout: PixelLayout::Rgb24ColumnMajor,
            data: Bytes::from(data),
        }
    }
}

fn held_axis(held: &HashSet<Key>, negative: Key, positive: Key) -> i32 {
    held.contains(&positive) as i32 - held.contains(&negative) as i32
}

#[async_trait]
impl Simulation for TestPattern {
    fn start(&self) -> Result<(), SimulationError> {
        self.state.lock().running = true;
        debug!(session_id = %self.session_id, "test pattern started");
        Ok(())
    }

    fn stop(&self) -> Result<(), SimulationError> {
        let mut state = self.state.lock();
        state.running = false;
        state.held.clear();
        debug!(session_id = %self.session_id, "test pattern stopped");
        Ok(())
    }

    async fn next_frame(&self) -> Result<Frame, SimulationError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(SimulationError::Stopped);
        }
        Ok(Self::render(&mut state))
    }

    fn apply_input(&self, event: InputEvent) {
        let mut state = self.state.lock();
        match event {
            InputEvent::KeyDown { key } => {
                state.held.insert(key);
            }
            InputEvent::KeyUp { key } => {
                state.held.remove(&key);
            }
            InputEvent::PointerMotion { dx, dy } => {
                state.x = nudge(state.x, dx, WIDTH as i32 - SQUARE);
                state.y = nudge(state.y, dy, HEIGHT as i32 - SQUARE);
            }
            InputEvent::ButtonDown {
                button: PointerButton::Left,
            } => state.inverted = !state.inverted,
            InputEvent::ButtonDown { .. } | InputEvent::ButtonUp { .. } => {}
        }
    }

    fn update_parameters(&self, params: Value) -> Result<(), ParamsError> {
        let parsed = PatternParams::parse(params)?;
        self.state.lock().params = parsed;
        Ok(())
    }
}

/// Moves `pos` by `delta` within `0..=max`. Clamped in floating point so
/// arbitrary client deltas cannot overflow.
fn nudge(pos: i32, delta: f64, max: i32) -> i32 {
    (f64::from(pos) + delta).round().clamp(0.0, f64::from(max)) as i32
}

pub struct TestPatternFactory;

impl SimulationFactory for TestPatternFactory {
    fn create(&self, ctx: SimulationContext) -> Result<Arc<dyn Simulation>, SimulationError> {
        Ok(Arc::new(TestPattern::new(&ctx)))
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "title": "PatternParams",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "speed": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 50,
                    "default": default_speed()
                },
                "color": {
                    "type": "array",
                    "items": { "type": "integer", "minimum": 0, "maximum": 255 },
                    "minItems": 3,
                    "maxItems": 3,
                    "default": default_color()
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::ComputeDevice;

    fn ctx() -> SimulationContext {
        SimulationContext {
            session_id: "pattern".into(),
            category: CATEGORY.into(),
            simulation_id: ID.into(),
            fps: 30,
            device: ComputeDevice::Cpu,
        }
    }

    #[tokio::test]
    async fn frames_only_while_running() {
        let sim = TestPattern::new(&ctx());
        assert!(matches!(
            sim.next_frame().await,
            Err(SimulationError::Stopped)
        ));
        sim.start().unwrap();
        let frame = sim.next_frame().await.expect("frame");
        assert_eq!(frame.layout, PixelLayout::Rgb24ColumnMajor);
        assert_eq!(frame.data.len(), (WIDTH * HEIGHT * 3) as usize);
        sim.stop().unwrap();
        assert!(sim.next_frame().await.is_err());
    }

    #[test]
    fn huge_pointer_motion_pins_to_the_edges() {
        let sim = TestPattern::new(&ctx());
        sim.apply_input(InputEvent::PointerMotion { dx: 1e12, dy: -1e12 });
        {
            let state = sim.state.lock();
            assert_eq!(state.x, WIDTH as i32 - SQUARE);
            assert_eq!(state.y, 0);
        }
        sim.apply_input(InputEvent::PointerMotion {
            dx: f64::MIN,
            dy: f64::MAX,
        });
        let state = sim.state.lock();
        assert_eq!(state.x, 0);
        assert_eq!(state.y, HEIGHT as i32 - SQUARE);
    }

    #[test]
    fn invalid_params_leave_state_untouched() {
        let sim = TestPattern::new(&ctx());
        sim.update_parameters(json!({"speed": 9})).expect("valid");
        let err = sim
            .update_parameters(json!({"speed": 900, "color": [1, 2, 3]}))
            .unwrap_err();
        assert!(matches!(err, ParamsError::Invalid(_)));
        let err = sim.update_parameters(json!({"warp": true})).unwrap_err();
        assert!(matches!(err, ParamsError::Invalid(_)));
        assert_eq!(sim.params().speed, 9);
        assert_eq!(sim.params().color, default_color());
    }
}

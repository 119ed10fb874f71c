//! Polled key state and the fixed-cadence update loop.
//!
//! The platform's event thread records which keys are down; the update
//! thread polls that table every tick and applies every held key to the
//! shared view state. Holding several keys combines their effects within a
//! single tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::info;

use crate::engine::{Shared, ITERATION_STEP, MIN_ITERATIONS};

/// Time between update ticks.
pub const UPDATE_DELAY: Duration = Duration::from_millis(50);

/// The viewer's key set. Variants double as indices into [`KeyStates`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Key {
    ZoomIn,
    ZoomOut,
    PanUp,
    PanLeft,
    PanDown,
    PanRight,
    IterationsUp,
    IterationsDown,
    Snapshot,
}

const KEY_COUNT: usize = 9;

/// Is-down state per key, written by the event thread and polled by the
/// update thread.
#[derive(Default)]
pub struct KeyStates([AtomicBool; KEY_COUNT]);

impl KeyStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: Key, down: bool) {
        self.0[key as usize].store(down, Ordering::Relaxed)
    }

    pub fn is_down(&self, key: Key) -> bool {
        self.0[key as usize].load(Ordering::Relaxed)
    }
}

/// One update tick: apply every held key to the shared view state, then
/// invalidate the current generation if anything changed.
///
/// SPACE only logs a snapshot of the viewport; it never forces a redraw.
pub fn apply_held_keys(keys: &KeyStates, shared: &Shared) {
    let mut redraw = false;

    {
        let mut view = shared.view.lock().unwrap();

        if keys.is_down(Key::ZoomIn) {
            view.viewport.zoom_in();
            redraw = true;
        }

        if keys.is_down(Key::ZoomOut) {
            view.viewport.zoom_out();
            redraw = true;
        }

        if keys.is_down(Key::Snapshot) {
            let v = view.viewport;
            info!(
                "set snapshot: [{}] {} {} {} {}",
                v.zoom_factor, v.top, v.bottom, v.left, v.right
            );
        }

        if keys.is_down(Key::PanUp) {
            view.viewport.pan_up();
            redraw = true;
        }

        if keys.is_down(Key::PanLeft) {
            view.viewport.pan_left();
            redraw = true;
        }

        if keys.is_down(Key::PanDown) {
            view.viewport.pan_down();
            redraw = true;
        }

        if keys.is_down(Key::PanRight) {
            view.viewport.pan_right();
            redraw = true;
        }

        if keys.is_down(Key::IterationsUp) {
            view.max_iterations += ITERATION_STEP;
            redraw = true;
        }

        if keys.is_down(Key::IterationsDown) {
            view.max_iterations = view
                .max_iterations
                .saturating_sub(ITERATION_STEP)
                .max(MIN_ITERATIONS);
            redraw = true;
        }
    }

    if redraw {
        shared.invalidate();
    }
}

/// Body of the dedicated update thread.
pub fn run_update_loop(keys: &KeyStates, shared: &Shared) {
    while !shared.quitting() {
        apply_held_keys(keys, shared);
        thread::sleep(UPDATE_DELAY);
    }
    info!("update loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ViewState, DEFAULT_MAX_ITERATIONS};
    use crate::viewport::Viewport;

    fn test_shared() -> Shared {
        Shared::new(ViewState {
            viewport: Viewport::home(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    #[test]
    fn key_states_start_released() {
        let keys = KeyStates::new();
        assert!(!keys.is_down(Key::ZoomIn));
        keys.set(Key::ZoomIn, true);
        assert!(keys.is_down(Key::ZoomIn));
        assert!(!keys.is_down(Key::ZoomOut));
        keys.set(Key::ZoomIn, false);
        assert!(!keys.is_down(Key::ZoomIn));
    }

    #[test]
    fn zoom_in_tick_matches_the_key_table() {
        let shared = test_shared();
        let keys = KeyStates::new();
        keys.set(Key::ZoomIn, true);

        apply_held_keys(&keys, &shared);

        let view = shared.view.lock().unwrap();
        assert_eq!(view.viewport.left, -1.9);
        assert_eq!(view.viewport.right, 0.9);
        assert_eq!(view.viewport.top, 1.05);
        assert_eq!(view.viewport.bottom, -1.05);
        assert_eq!(view.viewport.zoom_factor, 0.1);
        drop(view);
        assert!(shared.needs_redraw());
    }

    #[test]
    fn held_keys_combine_in_one_tick() {
        let shared = test_shared();
        let keys = KeyStates::new();
        keys.set(Key::PanUp, true);
        keys.set(Key::PanRight, true);

        apply_held_keys(&keys, &shared);

        let view = shared.view.lock().unwrap();
        assert_eq!(view.viewport.top, 1.225);
        assert_eq!(view.viewport.bottom, -1.025);
        assert_eq!(view.viewport.left, -1.9);
        assert_eq!(view.viewport.right, 1.1);
    }

    #[test]
    fn opposite_pan_ticks_cancel_exactly() {
        let shared = test_shared();
        let start = shared.view.lock().unwrap().viewport;

        let keys = KeyStates::new();
        keys.set(Key::PanUp, true);
        apply_held_keys(&keys, &shared);
        keys.set(Key::PanUp, false);
        keys.set(Key::PanDown, true);
        apply_held_keys(&keys, &shared);

        assert_eq!(shared.view.lock().unwrap().viewport, start);
    }

    #[test]
    fn iteration_limit_moves_in_steps_of_eight() {
        let shared = test_shared();
        let keys = KeyStates::new();
        keys.set(Key::IterationsUp, true);

        apply_held_keys(&keys, &shared);
        apply_held_keys(&keys, &shared);
        apply_held_keys(&keys, &shared);

        assert_eq!(shared.view.lock().unwrap().max_iterations, 792);
    }

    #[test]
    fn iteration_limit_floors_at_eight() {
        let shared = test_shared();
        shared.view.lock().unwrap().max_iterations = 16;

        let keys = KeyStates::new();
        keys.set(Key::IterationsDown, true);

        apply_held_keys(&keys, &shared);
        assert_eq!(shared.view.lock().unwrap().max_iterations, 8);
        apply_held_keys(&keys, &shared);
        assert_eq!(shared.view.lock().unwrap().max_iterations, 8);
    }

    #[test]
    fn snapshot_alone_does_not_redraw() {
        let shared = test_shared();
        let keys = KeyStates::new();
        keys.set(Key::Snapshot, true);

        apply_held_keys(&keys, &shared);

        assert!(!shared.needs_redraw());
        assert_eq!(shared.view.lock().unwrap().viewport, Viewport::home());
    }

    #[test]
    fn idle_tick_changes_nothing() {
        let shared = test_shared();
        let keys = KeyStates::new();

        apply_held_keys(&keys, &shared);

        assert!(!shared.needs_redraw());
        assert_eq!(shared.view.lock().unwrap().viewport, Viewport::home());
    }
}

//! The generation controller and its pool of per-tile compute workers.
//!
//! A *generation* is one complete attempt to fill the pixel buffer from the
//! current viewport. The controller spawns one worker thread per tile, joins
//! them, and starts over whenever the update loop invalidates the pass. A
//! viewport change during a pass flips the cancellation flag, which every
//! worker observes before each pixel, so an obsolete pass yields within one
//! pixel's work.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::escape::{colour, escape_time};
use crate::framebuffer::PixelBuffer;
use crate::tile::{Tile, TilePlan};
use crate::viewport::Viewport;

pub const DEFAULT_MAX_ITERATIONS: u32 = 768;
pub const ITERATION_STEP: u32 = 8;
pub const MIN_ITERATIONS: u32 = 8;

/// How long the controller dozes between polls while idle in `Complete`.
const IDLE_DELAY: Duration = Duration::from_millis(5);

/// Controller state, published for the update loop (which must know whether
/// an invalidation also needs to cancel an in-flight pass).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    Generating,
    Complete,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Init,
            1 => State::Generating,
            _ => State::Complete,
        }
    }
}

/// What the update loop edits and a worker snapshots at spawn.
#[derive(Copy, Clone, Debug)]
pub struct ViewState {
    pub viewport: Viewport,
    pub max_iterations: u32,
}

/// State shared between the update loop, the controller, its workers, and
/// the presenter.
///
/// The viewport and iteration limit live under one mutex; workers never read
/// them directly, they get a by-value snapshot taken right before spawn. The
/// flags are atomics: only the cancellation flag carries release/acquire
/// ordering, the rest are plain signals.
pub struct Shared {
    pub view: Mutex<ViewState>,
    cancel: AtomicBool,
    quit: AtomicBool,
    needs_redraw: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    pub fn new(view: ViewState) -> Self {
        Shared {
            view: Mutex::new(view),
            cancel: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            needs_redraw: AtomicBool::new(false),
            state: AtomicU8::new(State::Init as u8),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn set_cancel(&self) {
        self.cancel.store(true, Ordering::Release)
    }

    fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::Release)
    }

    pub fn quitting(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    /// Ask every loop to unwind. Cancellation is raised first so an
    /// in-flight generation stops computing pixels nobody will see.
    pub fn request_quit(&self) {
        self.set_cancel();
        self.quit.store(true, Ordering::Relaxed);
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw.load(Ordering::Relaxed)
    }

    fn clear_redraw(&self) {
        self.needs_redraw.store(false, Ordering::Relaxed)
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn publish_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Relaxed)
    }

    /// Record that the pixel buffer no longer depicts the view state. Called
    /// by the update loop after mutating the viewport or iteration limit;
    /// cancels the in-flight pass if there is one.
    pub fn invalidate(&self) {
        self.needs_redraw.store(true, Ordering::Relaxed);
        if self.state() == State::Generating {
            self.set_cancel();
        }
    }
}

/// Fill one tile from a viewport snapshot, bailing out as soon as the
/// generation is cancelled.
fn compute_tile(
    frame: &PixelBuffer,
    tile: Tile,
    viewport: Viewport,
    max_iterations: u32,
    shared: &Shared,
    generation: u64,
) {
    let started = Instant::now();
    debug!(
        "generation {}: tile {}-{} working from x: {} to {}, y: {} to {}",
        generation, tile.ix, tile.iy, tile.x0, tile.x1, tile.y0, tile.y1
    );

    let width = frame.width();
    let height = frame.height();
    let mut writer = frame.writer(tile);

    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            if shared.cancelled() {
                debug!(
                    "generation {}: tile {}-{} abandoned after {} ms",
                    generation,
                    tile.ix,
                    tile.iy,
                    started.elapsed().as_millis()
                );
                return;
            }

            let n = escape_time(viewport.point_at(x, y, width, height), max_iterations);
            writer.set(x, y, colour(n, max_iterations));
        }
    }

    debug!(
        "generation {}: tile {}-{} finished in {} ms",
        generation,
        tile.ix,
        tile.iy,
        started.elapsed().as_millis()
    );
}

/// The generation state machine. Owned by the controller thread; tests
/// drive [`Engine::tick`] directly.
pub struct Engine {
    frame: Arc<PixelBuffer>,
    plan: TilePlan,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    generation: u64,
    state: State,
    pass_started: Instant,
}

impl Engine {
    pub fn new(frame: Arc<PixelBuffer>, plan: TilePlan, shared: Arc<Shared>) -> Self {
        Engine {
            frame,
            plan,
            shared,
            workers: Vec::new(),
            generation: 0,
            state: State::Init,
            pass_started: Instant::now(),
        }
    }

    /// Drive the state machine until quit, then join whatever is in flight.
    pub fn run(mut self) {
        while !self.shared.quitting() {
            self.tick();
        }
        self.join_workers();
        info!("controller stopped after generation {}", self.generation);
    }

    /// One state-machine step. `Generating` blocks until the pass joins.
    pub fn tick(&mut self) {
        match self.state {
            State::Init => self.begin_pass(),
            State::Generating => self.finish_pass(),
            State::Complete => self.idle(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn transition(&mut self, state: State) {
        self.state = state;
        self.shared.publish_state(state);
    }

    /// Clear the raster and spawn one worker per tile against a fresh
    /// viewport snapshot.
    fn begin_pass(&mut self) {
        self.generation += 1;
        self.shared.clear_redraw();
        self.shared.clear_cancel();
        self.frame.clear();
        info!(
            "pixel data cleared, drawing generation {} anew",
            self.generation
        );

        let ViewState {
            viewport,
            max_iterations,
        } = *self.shared.view.lock().unwrap();

        self.pass_started = Instant::now();
        for tile in self.plan.iter() {
            debug!(
                "generation {}: starting tile {}-{}",
                self.generation, tile.ix, tile.iy
            );

            let frame = Arc::clone(&self.frame);
            let shared = Arc::clone(&self.shared);
            let generation = self.generation;
            self.workers.push(thread::spawn(move || {
                compute_tile(&frame, tile, viewport, max_iterations, &shared, generation)
            }));
        }

        self.transition(State::Generating);
    }

    /// Join the roster, then either restart (pass was cancelled) or idle.
    fn finish_pass(&mut self) {
        self.join_workers();
        info!(
            "generation {} joined after {} ms",
            self.generation,
            self.pass_started.elapsed().as_millis()
        );

        if self.shared.cancelled() && !self.shared.quitting() {
            self.transition(State::Init);
        } else {
            self.transition(State::Complete);
        }
    }

    fn idle(&mut self) {
        if self.shared.needs_redraw() {
            self.transition(State::Init);
        } else {
            thread::sleep(IDLE_DELAY);
        }
    }

    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                // A panicked worker has broken the pass; nothing to retry.
                error!("compute worker panicked, shutting down");
                self.shared.request_quit();
            }
        }
    }
}

//! Fixed-capacity body map with an adaptive sub-stepping tick.
//!
//! [`SimpleMap`] owns every body, keeps collidable and non-collidable bodies
//! in separate buckets, and on each [`timer`](SimpleMap::timer) call:
//!
//! 1. advances collidable bodies in sub-steps, halving a sub-step whenever a
//!    pair would end it penetrating,
//! 2. responds to every touching pair once per tick,
//! 3. advances non-collidable bodies once without checks,
//! 4. optionally separates pairs still overlapping ([`PullApartMode`]),
//! 5. reports the resolved pairs to the caller and the registered listener.
//!
//! Bodies added, removed or cleared while a tick is running (typically from
//! the listener) are queued and applied when the outermost `timer` returns.
//!
//! # Example
//!
//! ```
//! use ballpit::{Body, Dynamics, SimpleMap, Sphere};
//! use nalgebra::Vector3;
//!
//! let mut map: SimpleMap<8> = SimpleMap::new();
//! let left = map
//!     .add(Body::new(Sphere::new(Vector3::new(-2.0, 0.0, 0.0), 1.0))
//!         .with_dynamics(Dynamics::new(1.0).with_velocity(Vector3::new(1.0, 0.0, 0.0))))
//!     .unwrap();
//! map.add(Body::new(Sphere::new(Vector3::new(2.0, 0.0, 0.0), 1.0))
//!     .with_dynamics(Dynamics::new(1.0).with_velocity(Vector3::new(-1.0, 0.0, 0.0))))
//!     .unwrap();
//!
//! map.prepare_for_new_timer_cycle();
//! let pairs = map.timer(2.0).unwrap();
//! assert!(pairs[0].contains(left));
//! ```

use core::fmt;

use heapless::Vec;
use log::{debug, trace, warn};
use nalgebra::Vector3;

use crate::body::{Body, CollisionStyle, Token};
use crate::error::{CollisionError, Result};
use crate::handler::{CollisionDepth, CollisionHandler};
use crate::stats::TickStats;

/// Sub-steps attempted per tick.
pub const MAX_OUTER_TRIES: u32 = 10;
/// Halvings attempted per sub-step before penetration is accepted as contact.
pub const MAX_INNER_TRIES: u32 = 5;
pub const DEFAULT_PULL_APART_MAX_ITERATIONS: u32 = 50;

/// Two bodies that collided, lower token first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollisionPair {
    first: Token,
    second: Token,
}

impl CollisionPair {
    pub fn new(a: Token, b: Token) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    #[inline]
    pub fn first(&self) -> Token {
        self.first
    }

    #[inline]
    pub fn second(&self) -> Token {
        self.second
    }

    pub fn contains(&self, token: Token) -> bool {
        self.first == token || self.second == token
    }

    /// The partner of `token`, if `token` is part of this pair.
    pub fn other(&self, token: Token) -> Option<Token> {
        if self.first == token {
            Some(self.second)
        } else if self.second == token {
            Some(self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for CollisionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

/// How overlaps left after sub-stepping are cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullApartMode {
    /// Leave overlaps alone.
    #[default]
    None,
    /// Move bodies apart, one pair at a time, up to the iteration cap.
    Instant,
    /// Give every overlapping pair a separating velocity.
    Force,
}

/// Where the map is in its tick cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPhase {
    #[default]
    Idle,
    /// Set by `prepare_for_new_timer_cycle` until the next `timer` call.
    Preparing,
    Stepping,
    Settling,
    Emitting,
    FlushingMutations,
}

/// Receives each tick's resolved pairs.
///
/// The listener may add, remove or clear bodies (deferred until the tick
/// ends) and may call `timer` again. A nested tick runs while the listener
/// is checked out of the map, so it reports only through its return value.
pub trait CollisionListener<const N: usize, const C: usize>: Sized {
    fn on_collisions(&mut self, map: &mut SimpleMap<N, C, Self>, pairs: &[CollisionPair]);
}

/// Plain-function listener signature.
pub type ListenerFn<const N: usize, const C: usize> = fn(&mut SimpleMap<N, C>, &[CollisionPair]);

/// Default listener: an optional plain function.
#[derive(Clone, Copy, Default)]
pub struct FnListener<const N: usize, const C: usize>(Option<ListenerFn<N, C>>);

impl<const N: usize, const C: usize> FnListener<N, C> {
    pub fn new(listener: ListenerFn<N, C>) -> Self {
        Self(Some(listener))
    }
}

impl<const N: usize, const C: usize> CollisionListener<N, C> for FnListener<N, C> {
    fn on_collisions(&mut self, map: &mut SimpleMap<N, C>, pairs: &[CollisionPair]) {
        if let Some(listener) = self.0 {
            listener(map, pairs);
        }
    }
}

/// Pairs found by one scan of the collidable bucket.
struct Scan<const C: usize> {
    contacts: Vec<(usize, usize), C>,
    penetrating: bool,
}

/// Body map and tick scheduler.
///
/// # Type Parameters
///
/// * `N` - Maximum number of bodies (compile-time capacity).
/// * `C` - Maximum number of contacts tracked per scan and per tick report.
/// * `L` - Collision listener; a stateful [`CollisionListener`] or the
///   function-pointer default.
pub struct SimpleMap<const N: usize, const C: usize = 64, L = FnListener<N, C>> {
    bodies: Vec<Body, N>,
    collidable: Vec<Token, N>,
    non_collidable: Vec<Token, N>,
    handler: CollisionHandler,
    gravity: Vector3<f32>,
    pull_apart_mode: PullApartMode,
    pull_apart_max_iterations: u32,
    /// `None` only while the listener itself is running.
    listener: Option<L>,
    /// Nesting depth of `timer` calls; non-zero while a tick runs.
    depth: u32,
    phase: TickPhase,
    pending_adds: Vec<Body, N>,
    pending_removals: Vec<Token, N>,
    pending_clear: Option<Vec<Token, N>>,
    tick_count: u64,
    last_stats: TickStats,
}

impl<const N: usize, const C: usize> Default for SimpleMap<N, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const C: usize> SimpleMap<N, C> {
    pub fn new() -> Self {
        Self::with_listener(FnListener::default())
    }

    pub fn set_collision_listener(&mut self, listener: ListenerFn<N, C>) {
        self.listener = Some(FnListener::new(listener));
    }

    pub fn clear_collision_listener(&mut self) {
        self.listener = Some(FnListener::default());
    }
}

impl<const N: usize, const C: usize, L: CollisionListener<N, C>> SimpleMap<N, C, L> {
    /// Create a map that reports collisions to `listener`.
    pub fn with_listener(listener: L) -> Self {
        Self {
            bodies: Vec::new(),
            collidable: Vec::new(),
            non_collidable: Vec::new(),
            handler: CollisionHandler::new(),
            gravity: Vector3::zeros(),
            pull_apart_mode: PullApartMode::None,
            pull_apart_max_iterations: DEFAULT_PULL_APART_MAX_ITERATIONS,
            listener: Some(listener),
            depth: 0,
            phase: TickPhase::Idle,
            pending_adds: Vec::new(),
            pending_removals: Vec::new(),
            pending_clear: None,
            tick_count: 0,
            last_stats: TickStats::default(),
        }
    }

    /// Builder: use a pre-configured handler.
    pub fn with_handler(mut self, handler: CollisionHandler) -> Self {
        self.handler = handler;
        self
    }

    // -- Configuration --

    pub fn handler(&self) -> &CollisionHandler {
        &self.handler
    }

    /// Tunables are validated by the handler's setters.
    pub fn handler_mut(&mut self) -> &mut CollisionHandler {
        &mut self.handler
    }

    /// Set the gravity vector (e.g., `Vector3::new(0.0, -9.81, 0.0)`).
    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.gravity = gravity;
    }

    pub fn gravity(&self) -> Vector3<f32> {
        self.gravity
    }

    pub fn set_pull_apart_mode(&mut self, mode: PullApartMode) {
        self.pull_apart_mode = mode;
    }

    pub fn pull_apart_mode(&self) -> PullApartMode {
        self.pull_apart_mode
    }

    /// Cap on instant pull-apart passes per tick.
    pub fn set_pull_apart_max_iterations(&mut self, iterations: u32) {
        self.pull_apart_max_iterations = iterations;
    }

    pub fn pull_apart_max_iterations(&self) -> u32 {
        self.pull_apart_max_iterations
    }

    /// The listener, unless it is the caller.
    pub fn listener(&self) -> Option<&L> {
        self.listener.as_ref()
    }

    pub fn listener_mut(&mut self) -> Option<&mut L> {
        self.listener.as_mut()
    }

    // -- State --

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    /// True while `timer` (or a listener it called) is running.
    #[inline]
    pub fn is_in_tick(&self) -> bool {
        self.depth > 0
    }

    /// Number of `timer` calls so far, nested ones included.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Statistics of the most recent tick.
    pub fn last_stats(&self) -> &TickStats {
        &self.last_stats
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.index_of(token).is_some()
    }

    /// Queued additions, removals and clears not yet applied.
    pub fn pending_mutations(&self) -> usize {
        self.pending_adds.len()
            + self.pending_removals.len()
            + usize::from(self.pending_clear.is_some())
    }

    // -- Body management --

    /// Register a body. Deferred until the tick ends when called mid-tick;
    /// the token is valid immediately either way.
    pub fn add(&mut self, body: Body) -> Result<Token> {
        let token = body.token();
        if self.contains(token) || self.pending_adds.iter().any(|b| b.token() == token) {
            return Err(CollisionError::DuplicateToken(token));
        }

        if self.is_in_tick() {
            if self.projected_len() >= N {
                return Err(CollisionError::CapacityExceeded {
                    resource: "bodies",
                    limit: N,
                });
            }
            self.pending_adds
                .push(body)
                .map_err(|_| CollisionError::CapacityExceeded {
                    resource: "pending additions",
                    limit: N,
                })?;
            trace!("add {} deferred", token);
            return Ok(token);
        }

        self.insert(body)?;
        Ok(token)
    }

    /// Unregister a body. Mid-tick the body stays live until the tick ends and
    /// a copy is returned; removing a queued addition cancels it.
    pub fn remove(&mut self, token: Token) -> Option<Body> {
        if let Some(index) = self.pending_adds.iter().position(|b| b.token() == token) {
            return Some(self.pending_adds.remove(index));
        }

        if self.is_in_tick() {
            let body = self.body(token)?.clone();
            if !self.pending_removals.contains(&token) {
                // One entry per live body, so this never exceeds N
                let _ = self.pending_removals.push(token);
            }
            trace!("remove {} deferred", token);
            return Some(body);
        }

        self.take(token)
    }

    /// Remove every body whose token is not in `skip`.
    pub fn clear(&mut self, skip: &[Token]) {
        if self.is_in_tick() {
            let mut keep = Vec::new();
            for token in skip.iter().filter(|t| self.contains(**t)) {
                if !keep.contains(token) {
                    let _ = keep.push(*token);
                }
            }
            self.pending_clear = Some(keep);
            trace!("clear deferred, keeping {}", skip.len());
            return;
        }
        self.clear_now(skip);
    }

    /// Iterate over all live bodies.
    pub fn bodies(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter()
    }

    pub fn body(&self, token: Token) -> Option<&Body> {
        self.bodies.iter().find(|b| b.token() == token)
    }

    /// Style changes made through this reference take effect on the next
    /// `prepare_for_new_timer_cycle`.
    pub fn body_mut(&mut self, token: Token) -> Option<&mut Body> {
        self.bodies.iter_mut().find(|b| b.token() == token)
    }

    pub fn set_style(&mut self, token: Token, style: CollisionStyle) -> Result<()> {
        let body = self
            .body_mut(token)
            .ok_or(CollisionError::UnknownToken(token))?;
        body.set_style(style);
        Ok(())
    }

    // -- Tick --

    /// Move bodies whose style flipped to or from `Ghost` into the right
    /// bucket, then reset each body's trial state and force accumulator.
    pub fn prepare_for_new_timer_cycle(&mut self) {
        self.phase = TickPhase::Preparing;
        self.rebucket();
        for body in self.bodies.iter_mut() {
            body.prepare_for_new_cycle();
        }
    }

    /// Advance the world by `elapsed` and return the pairs that collided, or
    /// `None` if nothing did. Each pair appears at most once.
    pub fn timer(&mut self, elapsed: f32) -> Option<Vec<CollisionPair, C>> {
        let outermost = self.depth == 0;
        self.depth += 1;
        self.tick_count += 1;

        let report = self.run_tick(elapsed);

        self.depth -= 1;
        if outermost {
            self.phase = TickPhase::FlushingMutations;
            self.flush_mutations();
            self.phase = TickPhase::Idle;
        }
        report
    }

    fn run_tick(&mut self, elapsed: f32) -> Option<Vec<CollisionPair, C>> {
        let mut stats = TickStats::start(elapsed);
        let collidable = self.indices_of(&self.collidable);
        let unchecked = self.indices_of(&self.non_collidable);
        let mut resolved: Vec<CollisionPair, C> = Vec::new();

        self.phase = TickPhase::Stepping;
        self.step_collidable(&collidable, elapsed, &mut resolved, &mut stats);

        let gravity = self.gravity;
        for &i in &unchecked {
            let body = &mut self.bodies[i];
            body.test_position(elapsed, gravity);
            body.commit();
        }

        self.phase = TickPhase::Settling;
        match self.pull_apart_mode {
            PullApartMode::None => {}
            PullApartMode::Instant => self.settle_instant(&collidable, &mut resolved, &mut stats),
            PullApartMode::Force => self.settle_force(&collidable, &mut resolved, &mut stats),
        }

        stats.pairs_resolved = resolved.len() as u32;
        stats.finish();
        debug!("tick {}: {}", self.tick_count, stats.summary());
        self.last_stats = stats;

        self.phase = TickPhase::Emitting;
        if resolved.is_empty() {
            return None;
        }
        if let Some(mut listener) = self.listener.take() {
            listener.on_collisions(self, &resolved);
            // Keep a replacement installed from inside the callback
            if self.listener.is_none() {
                self.listener = Some(listener);
            }
        }
        Some(resolved)
    }

    /// Adaptive sub-stepping of the collidable bucket.
    fn step_collidable(
        &mut self,
        indices: &[usize],
        elapsed: f32,
        resolved: &mut Vec<CollisionPair, C>,
        stats: &mut TickStats,
    ) {
        let gravity = self.gravity;
        let mut current = 0.0;
        let mut target = elapsed;
        let mut outer = 0;

        while current < elapsed && outer < MAX_OUTER_TRIES {
            outer += 1;
            let mut inner = 0;

            let contacts = loop {
                for &i in indices {
                    self.bodies[i].test_position(target - current, gravity);
                }
                let scan = self.scan(indices);
                if !scan.penetrating {
                    break scan.contacts;
                }
                if inner < MAX_INNER_TRIES {
                    for &i in indices {
                        self.bodies[i].discard_trial();
                    }
                    target = 0.5 * (current + target);
                    inner += 1;
                    stats.rollbacks += 1;
                    continue;
                }
                warn!(
                    "penetration persists after {} halvings at t={}, treating as contact",
                    MAX_INNER_TRIES, current
                );
                stats.forced_touches += 1;
                break scan.contacts;
            };

            trace!(
                "sub-step {}..{}: {} contacts after {} halvings",
                current,
                target,
                contacts.len(),
                inner
            );

            // Responses read committed positions and write committed velocities
            for &i in indices {
                self.bodies[i].commit();
            }
            for &(i, j) in &contacts {
                self.respond(i, j, resolved);
            }

            current = target;
            target = elapsed;
        }

        stats.outer_iterations = outer;
        stats.simulated = current;
        if current < elapsed {
            warn!(
                "sub-step budget used up: simulated {} of {}",
                current, elapsed
            );
        }
    }

    /// Every touching or penetrating pair among `indices`, at trial positions.
    fn scan(&self, indices: &[usize]) -> Scan<C> {
        let mut scan = Scan {
            contacts: Vec::new(),
            penetrating: false,
        };
        for (a, &i) in indices.iter().enumerate() {
            for &j in &indices[a + 1..] {
                let (first, second) = (&self.bodies[i], &self.bodies[j]);
                match self.handler.classify_bodies(first, second) {
                    CollisionDepth::NotColliding => continue,
                    CollisionDepth::Touching => {}
                    // Overlaps between two immovable bodies cannot be fixed by halving
                    CollisionDepth::Penetrating => scan.penetrating |= either_standard(first, second),
                }
                if scan.contacts.push((i, j)).is_err() {
                    warn!("contact buffer full ({}), dropping pair", C);
                }
            }
        }
        scan
    }

    fn respond(&mut self, i: usize, j: usize, resolved: &mut Vec<CollisionPair, C>) {
        let (first, second) = pair_mut(&mut self.bodies, i, j);
        let pair = CollisionPair::new(first.token(), second.token());
        if resolved.contains(&pair) {
            trace!("{} already resolved this tick", pair);
            return;
        }
        if let Err(err) = self.handler.collide(first, second) {
            warn!("{}", err);
        }
        record(resolved, pair);
    }

    /// First penetrating pair with at least one `Standard` body.
    fn find_penetrating(&self, indices: &[usize]) -> Option<(usize, usize)> {
        for (a, &i) in indices.iter().enumerate() {
            for &j in &indices[a + 1..] {
                let (first, second) = (&self.bodies[i], &self.bodies[j]);
                if either_standard(first, second)
                    && self.handler.classify_bodies(first, second) == CollisionDepth::Penetrating
                {
                    return Some((i, j));
                }
            }
        }
        None
    }

    fn settle_instant(
        &mut self,
        indices: &[usize],
        resolved: &mut Vec<CollisionPair, C>,
        stats: &mut TickStats,
    ) {
        for _ in 0..self.pull_apart_max_iterations {
            let Some((i, j)) = self.find_penetrating(indices) else {
                return;
            };
            let (first, second) = pair_mut(&mut self.bodies, i, j);
            self.handler.pull_apart_instant(first, second);
            stats.pull_aparts += 1;
            record(resolved, CollisionPair::new(first.token(), second.token()));
        }
        if self.find_penetrating(indices).is_some() {
            warn!(
                "instant pull-apart stopped after {} iterations with overlaps left",
                self.pull_apart_max_iterations
            );
        }
    }

    fn settle_force(
        &mut self,
        indices: &[usize],
        resolved: &mut Vec<CollisionPair, C>,
        stats: &mut TickStats,
    ) {
        let mut overlapping: Vec<(usize, usize), C> = Vec::new();
        for (a, &i) in indices.iter().enumerate() {
            for &j in &indices[a + 1..] {
                let (first, second) = (&self.bodies[i], &self.bodies[j]);
                if either_standard(first, second)
                    && self.handler.classify_bodies(first, second) == CollisionDepth::Penetrating
                    && overlapping.push((i, j)).is_err()
                {
                    warn!("contact buffer full ({}), dropping pair", C);
                }
            }
        }

        for &(i, j) in &overlapping {
            let (first, second) = pair_mut(&mut self.bodies, i, j);
            self.handler.pull_apart_spring(first, second);
            stats.pull_aparts += 1;
            record(resolved, CollisionPair::new(first.token(), second.token()));
        }
    }

    // -- Storage --

    /// Body count once the queued mutations are applied.
    fn projected_len(&self) -> usize {
        let (kept, removed) = match &self.pending_clear {
            Some(keep) => (
                keep.len(),
                self.pending_removals
                    .iter()
                    .filter(|t| keep.contains(t))
                    .count(),
            ),
            None => (self.bodies.len(), self.pending_removals.len()),
        };
        kept - removed + self.pending_adds.len()
    }

    fn index_of(&self, token: Token) -> Option<usize> {
        self.bodies.iter().position(|b| b.token() == token)
    }

    fn indices_of(&self, tokens: &[Token]) -> Vec<usize, N> {
        let mut indices = Vec::new();
        for index in tokens.iter().filter_map(|t| self.index_of(*t)) {
            let _ = indices.push(index);
        }
        indices
    }

    fn insert(&mut self, body: Body) -> Result<()> {
        let token = body.token();
        let collidable = body.style().is_collidable();
        self.bodies
            .push(body)
            .map_err(|_| CollisionError::CapacityExceeded {
                resource: "bodies",
                limit: N,
            })?;
        let bucket = if collidable {
            &mut self.collidable
        } else {
            &mut self.non_collidable
        };
        // Buckets hold a subset of the bodies, so they have room
        let _ = bucket.push(token);
        Ok(())
    }

    fn take(&mut self, token: Token) -> Option<Body> {
        let index = self.index_of(token)?;
        self.collidable.retain(|t| *t != token);
        self.non_collidable.retain(|t| *t != token);
        Some(self.bodies.remove(index))
    }

    fn clear_now(&mut self, skip: &[Token]) {
        self.bodies.retain(|b| skip.contains(&b.token()));
        self.collidable.retain(|t| skip.contains(t));
        self.non_collidable.retain(|t| skip.contains(t));
    }

    fn rebucket(&mut self) {
        let bodies = &self.bodies;
        let style_of = |token: &Token| bodies.iter().find(|b| b.token() == *token).map(|b| b.style());

        let mut to_ghost: Vec<Token, N> = Vec::new();
        let mut to_solid: Vec<Token, N> = Vec::new();
        for token in &self.collidable {
            if style_of(token).is_some_and(|s| !s.is_collidable()) {
                let _ = to_ghost.push(*token);
            }
        }
        for token in &self.non_collidable {
            if style_of(token).is_some_and(|s| s.is_collidable()) {
                let _ = to_solid.push(*token);
            }
        }
        if to_ghost.is_empty() && to_solid.is_empty() {
            return;
        }

        self.collidable.retain(|t| !to_ghost.contains(t));
        self.non_collidable.retain(|t| !to_solid.contains(t));
        for token in &to_ghost {
            let _ = self.non_collidable.push(*token);
        }
        for token in &to_solid {
            let _ = self.collidable.push(*token);
        }
        debug!(
            "re-bucketed {} to ghost, {} to collidable",
            to_ghost.len(),
            to_solid.len()
        );
    }

    /// Apply queued mutations: clear, then removals, then additions.
    fn flush_mutations(&mut self) {
        let clear = self.pending_clear.take();
        let removals = core::mem::take(&mut self.pending_removals);
        let additions = core::mem::take(&mut self.pending_adds);
        if clear.is_none() && removals.is_empty() && additions.is_empty() {
            return;
        }

        debug!(
            "flushing mutations: clear={} removals={} additions={}",
            clear.is_some(),
            removals.len(),
            additions.len()
        );
        if let Some(skip) = clear {
            self.clear_now(&skip);
        }
        for token in removals {
            self.take(token);
        }
        for body in additions {
            let token = body.token();
            if let Err(err) = self.insert(body) {
                warn!("dropping deferred add of {}: {}", token, err);
            }
        }
    }
}

#[inline]
fn either_standard(first: &Body, second: &Body) -> bool {
    first.style() == CollisionStyle::Standard || second.style() == CollisionStyle::Standard
}

/// Two distinct bodies borrowed mutably, in `(i, j)` order.
fn pair_mut(bodies: &mut [Body], i: usize, j: usize) -> (&mut Body, &mut Body) {
    debug_assert_ne!(i, j);
    if i < j {
        let (head, tail) = bodies.split_at_mut(j);
        (&mut head[i], &mut tail[0])
    } else {
        let (head, tail) = bodies.split_at_mut(i);
        (&mut tail[0], &mut head[j])
    }
}

fn record<const C: usize>(resolved: &mut Vec<CollisionPair, C>, pair: CollisionPair) {
    if resolved.contains(&pair) {
        return;
    }
    if resolved.push(pair).is_err() {
        warn!("collision report full ({}), dropping {}", C, pair);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::body::{Dynamics, Sphere};

    const EPSILON: f32 = 1e-4;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn approx_vec_eq(a: &Vector3<f32>, b: &Vector3<f32>) -> bool {
        approx_eq(a.x, b.x) && approx_eq(a.y, b.y) && approx_eq(a.z, b.z)
    }

    fn ball(x: f32, vx: f32) -> Body {
        Body::new(Sphere::new(Vector3::new(x, 0.0, 0.0), 1.0)).with_dynamics(
            Dynamics::new(1.0)
                .with_velocity(Vector3::new(vx, 0.0, 0.0))
                .with_elasticity(1.0)
                .with_friction(0.0, 0.0),
        )
    }

    fn center_x<const N: usize>(map: &SimpleMap<N>, token: Token) -> f32 {
        map.body(token).unwrap().sphere.center.x
    }

    #[test]
    fn test_pair_orders_tokens() {
        let a = Token(5);
        let b = Token(2);
        let pair = CollisionPair::new(a, b);
        assert_eq!(pair.first(), b);
        assert_eq!(pair.second(), a);
        assert_eq!(pair, CollisionPair::new(b, a));
        assert_eq!(pair.other(a), Some(b));
        assert_eq!(pair.other(Token(9)), None);
    }

    #[test]
    fn test_add_and_lookup() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let token = map.add(ball(0.0, 0.0)).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains(token));
        assert_eq!(map.body(token).unwrap().token(), token);
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let body = ball(0.0, 0.0);
        map.add(body.clone()).unwrap();
        assert_eq!(
            map.add(body.clone()),
            Err(CollisionError::DuplicateToken(body.token()))
        );
    }

    #[test]
    fn test_add_over_capacity() {
        let mut map: SimpleMap<1> = SimpleMap::new();
        map.add(ball(0.0, 0.0)).unwrap();
        assert!(matches!(
            map.add(ball(5.0, 0.0)),
            Err(CollisionError::CapacityExceeded { limit: 1, .. })
        ));
    }

    #[test]
    fn test_remove_outside_tick() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let token = map.add(ball(0.0, 0.0)).unwrap();
        let removed = map.remove(token).unwrap();
        assert_eq!(removed.token(), token);
        assert!(map.is_empty());
        assert!(map.remove(token).is_none());
    }

    #[test]
    fn test_clear_keeps_skipped() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let keep = map.add(ball(0.0, 0.0)).unwrap();
        map.add(ball(5.0, 0.0)).unwrap();
        map.add(ball(10.0, 0.0)).unwrap();
        map.clear(&[keep]);
        assert_eq!(map.len(), 1);
        assert!(map.contains(keep));
    }

    #[test]
    fn test_set_style_unknown_token() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        assert_eq!(
            map.set_style(Token(u32::MAX), CollisionStyle::Ghost),
            Err(CollisionError::UnknownToken(Token(u32::MAX)))
        );
    }

    #[test]
    fn test_timer_empty_map() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.prepare_for_new_timer_cycle();
        assert!(map.timer(1.0).is_none());
        assert_eq!(map.tick_count(), 1);
        assert_eq!(map.phase(), TickPhase::Idle);
    }

    #[test]
    fn test_timer_moves_free_body() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let token = map.add(ball(0.0, 2.0)).unwrap();
        map.prepare_for_new_timer_cycle();
        assert!(map.timer(0.5).is_none());
        assert!(approx_eq(center_x(&map, token), 1.0));
        assert!(map.last_stats().completed());
        assert_eq!(map.last_stats().outer_iterations, 1);
    }

    #[test]
    fn test_timer_applies_gravity() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.set_gravity(Vector3::new(0.0, -10.0, 0.0));
        let token = map.add(ball(0.0, 0.0)).unwrap();
        map.prepare_for_new_timer_cycle();
        map.timer(0.1);
        let body = map.body(token).unwrap();
        assert!(approx_vec_eq(&body.velocity(), &Vector3::new(0.0, -1.0, 0.0)));
        assert!(approx_eq(body.sphere.center.y, -0.1));
    }

    #[test]
    fn test_head_on_halves_to_contact() {
        // Centers 4 apart closing at 2: contact at exactly t = 1
        let mut map: SimpleMap<4> = SimpleMap::new();
        let a = map.add(ball(-2.0, 1.0)).unwrap();
        let b = map.add(ball(2.0, -1.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        let pairs = map.timer(2.0).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0], CollisionPair::new(a, b));

        assert!(approx_vec_eq(
            &map.body(a).unwrap().velocity(),
            &Vector3::new(-1.0, 0.0, 0.0)
        ));
        assert!(approx_vec_eq(
            &map.body(b).unwrap().velocity(),
            &Vector3::new(1.0, 0.0, 0.0)
        ));
        assert!(approx_eq(center_x(&map, a), -2.0));
        assert!(approx_eq(center_x(&map, b), 2.0));

        let stats = map.last_stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.outer_iterations, 2);
        assert_eq!(stats.pairs_resolved, 1);
    }

    #[test]
    fn test_stationary_partner_never_moves() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let wall = map
            .add(ball(2.0, 0.0).with_style(CollisionStyle::Stationary))
            .unwrap();
        let mover = map.add(ball(-2.0, 2.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        assert!(map.timer(2.0).is_some());
        assert!(approx_eq(center_x(&map, wall), 2.0));
        assert!(approx_eq(map.body(wall).unwrap().velocity().x, 0.0));
        assert!(map.body(mover).unwrap().velocity().x < 0.0);
    }

    #[test]
    fn test_ghost_rebucketed_on_prepare() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let a = map.add(ball(-2.0, 1.0)).unwrap();
        let b = map.add(ball(2.0, -1.0)).unwrap();
        map.set_style(b, CollisionStyle::Ghost).unwrap();

        map.prepare_for_new_timer_cycle();
        assert!(map.timer(2.0).is_none());
        // Passed through each other
        assert!(approx_eq(center_x(&map, a), 0.0));
        assert!(approx_eq(center_x(&map, b), 0.0));

        map.set_style(b, CollisionStyle::Standard).unwrap();
        map.prepare_for_new_timer_cycle();
        assert_eq!(map.collidable.len(), 2);
        assert!(map.non_collidable.is_empty());
    }

    #[test]
    fn test_instant_pull_apart_separates() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.set_pull_apart_mode(PullApartMode::Instant);
        let a = map.add(ball(0.0, 0.0)).unwrap();
        let b = map.add(ball(0.8, 0.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        let pairs = map.timer(0.1).unwrap();
        assert_eq!(pairs.len(), 1);
        let gap = center_x(&map, b) - center_x(&map, a);
        assert!(approx_eq(gap, 2.0 * 1.01));
        assert_eq!(map.last_stats().pull_aparts, 1);
    }

    #[test]
    fn test_force_pull_apart_sets_velocity() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.set_pull_apart_mode(PullApartMode::Force);
        let a = map.add(ball(0.0, 0.0)).unwrap();
        let b = map.add(ball(1.0, 0.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        assert!(map.timer(0.1).is_some());
        // 20 * (1 - 1/2) = 10 each way
        assert!(approx_eq(map.body(a).unwrap().velocity().x, -10.0));
        assert!(approx_eq(map.body(b).unwrap().velocity().x, 10.0));
        assert!(approx_eq(center_x(&map, a), 0.0));
    }

    #[test]
    fn test_instant_pull_apart_respects_cap() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.set_pull_apart_mode(PullApartMode::Instant);
        map.set_pull_apart_max_iterations(0);
        map.add(ball(0.0, 0.0)).unwrap();
        map.add(ball(0.8, 0.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        map.timer(0.1);
        assert_eq!(map.last_stats().pull_aparts, 0);
    }

    fn despawn_partners(map: &mut SimpleMap<4>, pairs: &[CollisionPair]) {
        assert!(map.is_in_tick());
        let before = map.len();
        for pair in pairs {
            assert!(map.remove(pair.second()).is_some());
        }
        map.add(Body::new(Sphere::new(Vector3::new(50.0, 0.0, 0.0), 1.0)).with_tag(7))
            .unwrap();
        // Nothing applied until the tick ends
        assert_eq!(map.len(), before);
        assert_eq!(map.pending_mutations(), pairs.len() + 1);
    }

    #[test]
    fn test_listener_mutations_deferred() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.set_collision_listener(despawn_partners);
        let a = map.add(ball(-2.0, 1.0)).unwrap();
        let b = map.add(ball(2.0, -1.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        assert!(map.timer(2.0).is_some());
        assert_eq!(map.pending_mutations(), 0);
        assert!(map.contains(a));
        assert!(!map.contains(b));
        assert!(map.bodies().any(|body| body.tag == 7));
        assert_eq!(map.len(), 2);
    }

    fn nested_tick(map: &mut SimpleMap<4>, _pairs: &[CollisionPair]) {
        map.add(Body::new(Sphere::new(Vector3::new(50.0, 0.0, 0.0), 1.0)).with_tag(9))
            .unwrap();
        assert!(map.timer(0.0).is_none());
        // The nested tick must not flush
        assert_eq!(map.pending_mutations(), 1);
    }

    #[test]
    fn test_nested_timer_does_not_flush() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.set_collision_listener(nested_tick);
        map.add(ball(-2.0, 1.0)).unwrap();
        map.add(ball(2.0, -1.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        assert!(map.timer(2.0).is_some());
        assert_eq!(map.tick_count(), 2);
        assert!(map.bodies().any(|body| body.tag == 9));
    }

    #[test]
    fn test_remove_cancels_pending_add() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        map.depth = 1;
        let token = map
            .add(Body::new(Sphere::new(Vector3::zeros(), 1.0)))
            .unwrap();
        assert!(map.remove(token).is_some());
        map.depth = 0;
        map.flush_mutations();
        assert!(map.is_empty());
    }

    #[test]
    fn test_clear_deferred_in_tick() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let keep = map.add(ball(0.0, 0.0)).unwrap();
        map.add(ball(5.0, 0.0)).unwrap();
        map.depth = 1;
        map.clear(&[keep]);
        assert_eq!(map.len(), 2);
        map.depth = 0;
        map.flush_mutations();
        assert_eq!(map.len(), 1);
        assert!(map.contains(keep));
    }

    #[test]
    fn test_halving_budget_exhausted_on_initial_overlap() {
        // 50% overlap from the start can never be stepped out of
        let mut map: SimpleMap<4> = SimpleMap::new();
        let a = map.add(ball(0.0, 0.0)).unwrap();
        let b = map.add(ball(1.0, 0.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        let pairs = map.timer(1.0).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0], CollisionPair::new(a, b));

        let stats = map.last_stats();
        assert_eq!(stats.outer_iterations, MAX_OUTER_TRIES);
        assert_eq!(stats.rollbacks, MAX_OUTER_TRIES * MAX_INNER_TRIES);
        assert_eq!(stats.forced_touches, MAX_OUTER_TRIES);
        assert_eq!(stats.pairs_resolved, 1);
        assert!(stats.simulated > 0.0);
        assert!(!stats.completed());
    }

    fn add_when_full(map: &mut SimpleMap<2>, _pairs: &[CollisionPair]) {
        let extra = Body::new(Sphere::new(Vector3::new(50.0, 0.0, 0.0), 1.0));
        assert!(matches!(
            map.add(extra),
            Err(CollisionError::CapacityExceeded { limit: 2, .. })
        ));
        assert_eq!(map.pending_mutations(), 0);
    }

    #[test]
    fn test_add_in_tick_rejected_when_full() {
        let mut map: SimpleMap<2> = SimpleMap::new();
        map.set_collision_listener(add_when_full);
        map.add(ball(-2.0, 1.0)).unwrap();
        map.add(ball(2.0, -1.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        // The listener only runs when a pair is reported
        assert!(map.timer(2.0).is_some());
        assert_eq!(map.len(), 2);
    }

    fn swap_when_full(map: &mut SimpleMap<2>, pairs: &[CollisionPair]) {
        assert!(map.remove(pairs[0].second()).is_some());
        map.add(Body::new(Sphere::new(Vector3::new(50.0, 0.0, 0.0), 1.0)).with_tag(3))
            .unwrap();
        assert!(map
            .add(Body::new(Sphere::new(Vector3::new(80.0, 0.0, 0.0), 1.0)))
            .is_err());
    }

    #[test]
    fn test_add_in_tick_uses_slot_freed_by_remove() {
        let mut map: SimpleMap<2> = SimpleMap::new();
        map.set_collision_listener(swap_when_full);
        map.add(ball(-2.0, 1.0)).unwrap();
        map.add(ball(2.0, -1.0)).unwrap();
        map.prepare_for_new_timer_cycle();

        assert!(map.timer(2.0).is_some());
        assert_eq!(map.len(), 2);
        assert!(map.bodies().any(|body| body.tag == 3));
    }

    #[test]
    fn test_projected_len_after_clear() {
        let mut map: SimpleMap<4> = SimpleMap::new();
        let keep = map.add(ball(0.0, 0.0)).unwrap();
        map.add(ball(5.0, 0.0)).unwrap();
        map.add(ball(10.0, 0.0)).unwrap();
        map.depth = 1;
        map.clear(&[keep, keep]);
        map.remove(keep);
        assert_eq!(map.projected_len(), 0);
        map.depth = 0;
    }

    #[derive(Default)]
    struct HitLog {
        hits: u32,
        last: Option<CollisionPair>,
    }

    impl CollisionListener<4, 64> for HitLog {
        fn on_collisions(&mut self, map: &mut SimpleMap<4, 64, Self>, pairs: &[CollisionPair]) {
            assert!(map.is_in_tick());
            assert!(map.listener().is_none());
            self.hits += pairs.len() as u32;
            self.last = pairs.last().copied();
        }
    }

    #[test]
    fn test_stateful_listener_keeps_state() {
        let mut map: SimpleMap<4, 64, HitLog> = SimpleMap::with_listener(HitLog::default());
        let a = map.add(ball(-2.0, 1.0)).unwrap();
        let b = map.add(ball(2.0, -1.0)).unwrap();

        map.prepare_for_new_timer_cycle();
        assert!(map.timer(2.0).is_some());
        map.prepare_for_new_timer_cycle();
        assert!(map.timer(2.0).is_none());

        let log = map.listener().unwrap();
        assert_eq!(log.hits, 1);
        assert_eq!(log.last, Some(CollisionPair::new(a, b)));
        map.listener_mut().unwrap().hits = 0;
        assert_eq!(map.listener().unwrap().hits, 0);
    }
}

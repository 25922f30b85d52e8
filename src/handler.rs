//! Pairwise classification and collision response.
//!
//! [`CollisionHandler`] holds the tunables and runs:
//! - severity classification ([`CollisionDepth`]),
//! - separation of overlapping bodies (instant position push, or spring
//!   velocity nudge),
//! - impulse response, linear-only for plain pairs and with spin and
//!   Coulomb friction as soon as either side is rotatable.
//!
//! Which solver runs is decided once per pair by [`PairKind::of`]; the
//! rotational solver reads each side's optional [`Rotation`] directly, so a
//! plain body needs no stand-in rotatable wrapper.

use nalgebra::Vector3;

// ComplexField provides sqrt() for f32 in no_std via libm
#[allow(unused_imports)]
use nalgebra::ComplexField;

use crate::body::{Body, CollisionStyle, Dynamics, Rotation, Sphere};
use crate::error::{CollisionError, Result};
use crate::geometry::EPSILON;

/// Nudge applied to one of two coincident centers so a normal exists.
const DEGENERATE_NUDGE: Vector3<f32> = Vector3::new(0.001, 0.0, 0.0);

/// Severity of a contact, ordered `NotColliding < Touching < Penetrating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollisionDepth {
    NotColliding,
    Touching,
    Penetrating,
}

/// Handler tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandlerSettings {
    /// Fraction of the summed radii that must overlap before a contact counts
    /// as penetrating. Range `(0.001, 1.0)`.
    pub penetration_threshold_percent: f32,
    /// Instant pull-apart separates to `sum_radii * this`. Range `[1.0, 1.25]`.
    pub pull_apart_instant_percent: f32,
    /// Spring pull-apart speed at full overlap. Must be positive.
    pub pull_apart_spring_velocity: f32,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            penetration_threshold_percent: 0.01,
            pull_apart_instant_percent: 1.01,
            pull_apart_spring_velocity: 20.0,
        }
    }
}

/// Which solver a dynamic pair needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpulseKind {
    Plain,
    OneRotatable,
    BothRotatable,
}

/// Which side of a pair response may move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partnering {
    BothStandard,
    FirstStationary,
    SecondStationary,
}

/// Solver selection for a pair, resolved from body capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairKind {
    pub impulse: ImpulseKind,
    pub partnering: Partnering,
}

impl PairKind {
    /// Classify a pair for impulse response.
    ///
    /// `Ok(None)` means there is nothing to do: a `Ghost` is involved, or
    /// neither side is `Standard`. Bodies without dynamics are rejected.
    pub fn of(first: &Body, second: &Body) -> Result<Option<Self>> {
        if first.style() == CollisionStyle::Ghost || second.style() == CollisionStyle::Ghost {
            return Ok(None);
        }
        if !first.is_dynamic() || !second.is_dynamic() {
            return Err(CollisionError::UnsupportedPair {
                first: first.token(),
                second: second.token(),
            });
        }

        let partnering = match (
            first.style() == CollisionStyle::Standard,
            second.style() == CollisionStyle::Standard,
        ) {
            (true, true) => Partnering::BothStandard,
            (true, false) => Partnering::SecondStationary,
            (false, true) => Partnering::FirstStationary,
            (false, false) => return Ok(None),
        };

        let impulse = match (first.is_rotatable(), second.is_rotatable()) {
            (false, false) => ImpulseKind::Plain,
            (true, true) => ImpulseKind::BothRotatable,
            _ => ImpulseKind::OneRotatable,
        };

        Ok(Some(Self {
            impulse,
            partnering,
        }))
    }
}

/// One side of an impulse exchange.
struct Side<'a> {
    dynamics: &'a mut Dynamics,
    /// Inverse mass, zero when response may not move this side.
    inv_mass: f32,
    /// Whether angular momentum may change.
    spins: bool,
    /// Contact point relative to the center of mass.
    lever: Vector3<f32>,
}

impl Side<'_> {
    fn new<'a>(body: &'a mut Body, moves: bool, offset: Vector3<f32>) -> Option<Side<'a>> {
        let spins = body.style() != CollisionStyle::Stationary;
        let dynamics = body.dynamics_mut()?;
        let inv_mass = if moves { dynamics.inv_mass() } else { 0.0 };
        let lever = match &dynamics.rotation {
            Some(rotation) => offset - rotation.center_of_mass,
            None => offset,
        };
        Some(Side {
            dynamics,
            inv_mass,
            spins,
            lever,
        })
    }

    #[inline]
    fn rotation(&self) -> Option<&Rotation> {
        if self.spins {
            self.dynamics.rotation.as_ref()
        } else {
            None
        }
    }

    /// Velocity of the contact point: `v + ω × r`.
    fn contact_velocity(&self) -> Vector3<f32> {
        match &self.dynamics.rotation {
            Some(rotation) => {
                self.dynamics.velocity + rotation.angular_velocity.cross(&self.lever)
            }
            None => self.dynamics.velocity,
        }
    }

    /// Resistance to an impulse along `dir`: `1/m + dir·((I⁻¹(r × dir)) × r)`.
    fn inv_effective_mass(&self, dir: &Vector3<f32>) -> f32 {
        let angular = match self.rotation() {
            Some(rotation) => {
                let r = &self.lever;
                (rotation.inv_inertia * r.cross(dir)).cross(r).dot(dir)
            }
            None => 0.0,
        };
        self.inv_mass + angular
    }

    fn apply(&mut self, impulse: Vector3<f32>) {
        self.dynamics.velocity += impulse * self.inv_mass;
        if self.spins {
            let lever = self.lever;
            if let Some(rotation) = self.dynamics.rotation.as_mut() {
                rotation.add_angular_momentum(lever.cross(&impulse));
            }
        }
    }
}

/// Collision classification and response.
#[derive(Debug, Clone, Default)]
pub struct CollisionHandler {
    settings: HandlerSettings,
}

impl CollisionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a handler, validating every tunable.
    pub fn with_settings(settings: HandlerSettings) -> Result<Self> {
        let mut handler = Self::new();
        handler.set_penetration_threshold_percent(settings.penetration_threshold_percent)?;
        handler.set_pull_apart_instant_percent(settings.pull_apart_instant_percent)?;
        handler.set_pull_apart_spring_velocity(settings.pull_apart_spring_velocity)?;
        Ok(handler)
    }

    #[inline]
    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    pub fn penetration_threshold_percent(&self) -> f32 {
        self.settings.penetration_threshold_percent
    }

    pub fn set_penetration_threshold_percent(&mut self, value: f32) -> Result<()> {
        if !(value > 0.001 && value < 1.0) {
            return Err(CollisionError::OutOfRange {
                name: "penetration_threshold_percent",
                value,
            });
        }
        self.settings.penetration_threshold_percent = value;
        Ok(())
    }

    pub fn pull_apart_instant_percent(&self) -> f32 {
        self.settings.pull_apart_instant_percent
    }

    pub fn set_pull_apart_instant_percent(&mut self, value: f32) -> Result<()> {
        if !(1.0..=1.25).contains(&value) {
            return Err(CollisionError::OutOfRange {
                name: "pull_apart_instant_percent",
                value,
            });
        }
        self.settings.pull_apart_instant_percent = value;
        Ok(())
    }

    pub fn pull_apart_spring_velocity(&self) -> f32 {
        self.settings.pull_apart_spring_velocity
    }

    pub fn set_pull_apart_spring_velocity(&mut self, value: f32) -> Result<()> {
        if !(value > 0.0 && value.is_finite()) {
            return Err(CollisionError::OutOfRange {
                name: "pull_apart_spring_velocity",
                value,
            });
        }
        self.settings.pull_apart_spring_velocity = value;
        Ok(())
    }

    // -- Classification --

    /// How badly two spheres overlap.
    pub fn classify(&self, first: &Sphere, second: &Sphere) -> CollisionDepth {
        let dist_sq = (second.center - first.center).norm_squared();
        let sum_r = first.radius + second.radius;
        if dist_sq > sum_r * sum_r {
            return CollisionDepth::NotColliding;
        }

        let penetration = (sum_r - dist_sq.sqrt()) / sum_r;
        if penetration <= self.settings.penetration_threshold_percent {
            CollisionDepth::Touching
        } else {
            CollisionDepth::Penetrating
        }
    }

    /// Classify two bodies at their current (possibly trial) positions.
    #[inline]
    pub fn classify_bodies(&self, first: &Body, second: &Body) -> CollisionDepth {
        self.classify(&first.current_sphere(), &second.current_sphere())
    }

    // -- Separation --

    /// Push overlapping bodies apart along the center line until they sit at
    /// `sum_radii * pull_apart_instant_percent`. Only `Standard` bodies move;
    /// the larger `radius * mass` moves less.
    pub fn pull_apart_instant(&self, first: &mut Body, second: &mut Body) {
        let first_moves = first.style() == CollisionStyle::Standard;
        let second_moves = second.style() == CollisionStyle::Standard;
        if !first_moves && !second_moves {
            return;
        }

        separate_coincident(first, second);
        let diff = second.sphere.center - first.sphere.center;
        let dist = diff.norm();
        let sum_r = first.sphere.radius + second.sphere.radius;
        if dist >= sum_r {
            return;
        }

        let total = sum_r * self.settings.pull_apart_instant_percent - dist;
        let normal = diff / dist;
        let (first_share, second_share) = match (first_moves, second_moves) {
            (true, true) => {
                let w1 = push_weight(first);
                let w2 = push_weight(second);
                (w2 / (w1 + w2), w1 / (w1 + w2))
            }
            (true, false) => (1.0, 0.0),
            _ => (0.0, 1.0),
        };

        first.sphere.center -= normal * (total * first_share);
        second.sphere.center += normal * (total * second_share);
    }

    /// Give overlapping `Standard` dynamic bodies a separating velocity of
    /// `pull_apart_spring_velocity * (1 - dist / sum_radii)`. Positions are
    /// left alone.
    pub fn pull_apart_spring(&self, first: &mut Body, second: &mut Body) {
        let first_moves = first.style() == CollisionStyle::Standard;
        let second_moves = second.style() == CollisionStyle::Standard;
        if !first_moves && !second_moves {
            return;
        }

        separate_coincident(first, second);
        let diff = second.sphere.center - first.sphere.center;
        let dist = diff.norm();
        let sum_r = first.sphere.radius + second.sphere.radius;
        if dist >= sum_r {
            return;
        }

        let speed = self.settings.pull_apart_spring_velocity * (1.0 - dist / sum_r);
        let push = (diff / dist) * speed;

        if first_moves {
            if let Some(dynamics) = first.dynamics_mut() {
                dynamics.velocity -= push;
            }
        }
        if second_moves {
            if let Some(dynamics) = second.dynamics_mut() {
                dynamics.velocity += push;
            }
        }
    }

    // -- Impulse response --

    /// Resolve a contact between two bodies with the solver their
    /// capabilities call for. A `Ghost` on either side is a no-op.
    pub fn collide(&self, first: &mut Body, second: &mut Body) -> Result<()> {
        let Some(kind) = PairKind::of(first, second)? else {
            return Ok(());
        };
        let first_moves = kind.partnering != Partnering::FirstStationary;
        let second_moves = kind.partnering != Partnering::SecondStationary;

        separate_coincident(first, second);
        let diff = second.sphere.center - first.sphere.center;
        let dist = diff.norm();
        let normal = diff / dist;

        let sum_r = first.sphere.radius + second.sphere.radius;
        let first_offset = normal * (dist * first.sphere.radius / sum_r);
        let second_offset = -normal * (dist * second.sphere.radius / sum_r);

        let err = CollisionError::UnsupportedPair {
            first: first.token(),
            second: second.token(),
        };
        let mut a = Side::new(first, first_moves, first_offset).ok_or(err.clone())?;
        let mut b = Side::new(second, second_moves, second_offset).ok_or(err)?;

        match kind.impulse {
            ImpulseKind::Plain => impulse_linear(&normal, &mut a, &mut b),
            ImpulseKind::OneRotatable | ImpulseKind::BothRotatable => {
                impulse_rotational(&normal, &mut a, &mut b)
            }
        }
        Ok(())
    }
}

/// Nudge the second (or, if it can't move, the first) body off a coincident
/// center.
fn separate_coincident(first: &mut Body, second: &mut Body) {
    if (second.sphere.center - first.sphere.center).norm_squared() >= EPSILON * EPSILON {
        return;
    }
    if second.style() == CollisionStyle::Standard || first.style() != CollisionStyle::Standard {
        second.sphere.center += DEGENERATE_NUDGE;
    } else {
        first.sphere.center -= DEGENERATE_NUDGE;
    }
}

/// `radius * mass` for dynamic bodies, `radius` for plain ones.
fn push_weight(body: &Body) -> f32 {
    match body.dynamics() {
        Some(dynamics) => body.sphere.radius * dynamics.mass,
        None => body.sphere.radius,
    }
}

#[inline]
fn average_elasticity(a: &Side<'_>, b: &Side<'_>) -> f32 {
    0.5 * (a.dynamics.elasticity + b.dynamics.elasticity)
}

/// Linear-only impulse along `normal` (unit, first → second).
fn impulse_linear(normal: &Vector3<f32>, a: &mut Side<'_>, b: &mut Side<'_>) {
    let relative = a.dynamics.velocity - b.dynamics.velocity;
    let numerator = -(1.0 + average_elasticity(a, b)) * relative.dot(normal);
    if numerator > 0.0 {
        // Already separating
        return;
    }

    let denominator = normal.dot(&(normal * (a.inv_mass + b.inv_mass)));
    if denominator <= EPSILON {
        return;
    }

    let impulse = *normal * (numerator / denominator);
    a.dynamics.velocity += impulse * a.inv_mass;
    b.dynamics.velocity -= impulse * b.inv_mass;
}

/// Impulse with angular response and friction.
fn impulse_rotational(normal: &Vector3<f32>, a: &mut Side<'_>, b: &mut Side<'_>) {
    let relative = a.contact_velocity() - b.contact_velocity();
    let numerator = -(1.0 + average_elasticity(a, b)) * relative.dot(normal);
    if numerator >= 0.0 {
        return;
    }

    let denominator = a.inv_effective_mass(normal) + b.inv_effective_mass(normal);
    if denominator <= EPSILON {
        return;
    }

    let normal_impulse = numerator / denominator;
    let impulse = *normal * normal_impulse;
    a.apply(impulse);
    b.apply(-impulse);

    apply_friction(normal, normal_impulse.abs(), a, b);
}

/// Coulomb friction: stop the tangential slide if static friction can hold
/// it, otherwise slide with kinetic friction.
fn apply_friction(normal: &Vector3<f32>, normal_impulse: f32, a: &mut Side<'_>, b: &mut Side<'_>) {
    let relative = a.contact_velocity() - b.contact_velocity();
    let sliding = relative - normal * relative.dot(normal);
    let speed = sliding.norm();
    if speed < EPSILON {
        return;
    }
    let tangent = -sliding / speed;

    let resistance = a.inv_effective_mass(&tangent) + b.inv_effective_mass(&tangent);
    if resistance <= EPSILON {
        return;
    }
    let stopping = speed / resistance;

    let static_mu = 0.5 * (a.dynamics.static_friction + b.dynamics.static_friction);
    let friction = if normal_impulse * static_mu < stopping {
        let kinetic_mu = 0.5 * (a.dynamics.kinetic_friction + b.dynamics.kinetic_friction);
        normal_impulse * kinetic_mu
    } else {
        stopping
    };

    let impulse = tangent * friction;
    a.apply(impulse);
    b.apply(-impulse);
}

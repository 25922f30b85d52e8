//! Simulated bodies.
//!
//! A [`Body`] is a sphere plus collision metadata. Mass and velocity live in an
//! optional [`Dynamics`] component, and spin in an optional [`Rotation`]
//! component inside it, so a body's capabilities are inspected rather than
//! encoded in its type:
//!
//! | Capability | Component present |
//! |------------|-------------------|
//! | plain (sensor, marker) | none |
//! | dynamic | `Dynamics` |
//! | rotatable | `Dynamics` with `Rotation` |
//!
//! # Example
//! ```
//! use ballpit::body::{Body, CollisionStyle, Dynamics, Rotation, Sphere};
//! use nalgebra::Vector3;
//!
//! let ball = Body::new(Sphere::new(Vector3::new(0.0, 0.0, 0.0), 5.0))
//!     .with_style(CollisionStyle::Standard)
//!     .with_dynamics(
//!         Dynamics::new(2.0)
//!             .with_velocity(Vector3::new(1.0, 0.0, 0.0))
//!             .with_rotation(Rotation::solid_sphere(2.0, 5.0)),
//!     );
//! assert!(ball.is_rotatable());
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

static NEXT_TOKEN: AtomicU32 = AtomicU32::new(1);

/// Session-scoped identity of a body. Ordered; the lower token of a pair is its
/// primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub(crate) u32);

impl Token {
    /// Hand out the next unused token.
    pub fn next() -> Self {
        Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw integer value.
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A sphere in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vector3<f32>,
    pub radius: f32,
}

impl Sphere {
    /// # Panics
    /// Panics if `radius` is not positive and finite.
    pub fn new(center: Vector3<f32>, radius: f32) -> Self {
        assert!(radius > 0.0 && radius.is_finite(), "radius must be positive and finite");
        Self { center, radius }
    }
}

/// How a body takes part in collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionStyle {
    /// Never collides; kept out of the collidable set.
    Ghost,
    /// Detected and collided against, but response never changes its
    /// velocity or position.
    Stationary,
    /// Like `Stationary`, except its angular momentum may change.
    StationaryRotatable,
    /// Full two-way response.
    #[default]
    Standard,
}

impl CollisionStyle {
    /// Whether the scheduler puts the body in its collidable set.
    #[inline]
    pub fn is_collidable(self) -> bool {
        self != CollisionStyle::Ghost
    }

    /// `Stationary` or `StationaryRotatable`.
    #[inline]
    pub fn is_stationary(self) -> bool {
        matches!(self, CollisionStyle::Stationary | CollisionStyle::StationaryRotatable)
    }
}

/// Axis-aligned world bounds. Carried for edge handling done by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, point: &Vector3<f32>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

/// Rotational state of a rotatable body.
///
/// The inverse inertia tensor is body space and is kept aligned by whoever owns
/// the body; collision response only reads it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub angular_velocity: Vector3<f32>,
    pub angular_momentum: Vector3<f32>,
    /// Offset from the sphere center to the true center of mass.
    pub center_of_mass: Vector3<f32>,
    pub inv_inertia: Matrix3<f32>,
    /// Integrated from angular velocity when a sub-step is committed.
    pub orientation: UnitQuaternion<f32>,
}

impl Rotation {
    pub fn new(inv_inertia: Matrix3<f32>) -> Self {
        Self {
            angular_velocity: Vector3::zeros(),
            angular_momentum: Vector3::zeros(),
            center_of_mass: Vector3::zeros(),
            inv_inertia,
            orientation: UnitQuaternion::identity(),
        }
    }

    /// Uniform solid sphere: `I = (2/5) * m * r²`.
    pub fn solid_sphere(mass: f32, radius: f32) -> Self {
        let inv_i = 1.0 / (0.4 * mass * radius * radius);
        Self::new(Matrix3::from_diagonal(&Vector3::new(inv_i, inv_i, inv_i)))
    }

    /// Builder: offset the center of mass from the sphere center.
    pub fn with_center_of_mass(mut self, offset: Vector3<f32>) -> Self {
        self.center_of_mass = offset;
        self
    }

    /// Builder: set angular momentum (angular velocity follows).
    pub fn with_angular_momentum(mut self, momentum: Vector3<f32>) -> Self {
        self.angular_momentum = momentum;
        self.angular_velocity = self.inv_inertia * momentum;
        self
    }

    /// Add an angular impulse and refresh angular velocity: `ω = I⁻¹ L`.
    #[inline]
    pub fn add_angular_momentum(&mut self, delta: Vector3<f32>) {
        self.angular_momentum += delta;
        self.angular_velocity = self.inv_inertia * self.angular_momentum;
    }

    /// Integrate orientation: `q' = q + 0.5 * dt * ω * q`.
    fn integrate_orientation(&mut self, dt: f32) {
        let w = &self.angular_velocity;
        let half_dt = 0.5 * dt;
        let dq = nalgebra::Quaternion::new(0.0, w.x * half_dt, w.y * half_dt, w.z * half_dt);
        let q = self.orientation.into_inner();
        self.orientation = UnitQuaternion::new_normalize(q + dq * q);
    }
}

/// Mass, velocity and surface properties of a dynamic body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dynamics {
    pub mass: f32,
    pub velocity: Vector3<f32>,
    /// Bounciness, `0.0..=1.0`. The pair average is used at impact.
    pub elasticity: f32,
    pub kinetic_friction: f32,
    pub static_friction: f32,
    pub bounds: Option<Aabb>,
    pub rotation: Option<Rotation>,
}

impl Dynamics {
    /// # Panics
    /// Panics if `mass` is not positive and finite.
    pub fn new(mass: f32) -> Self {
        assert!(mass > 0.0 && mass.is_finite(), "mass must be positive and finite");
        Self {
            mass,
            velocity: Vector3::zeros(),
            elasticity: 0.5,
            kinetic_friction: 0.3,
            static_friction: 0.4,
            bounds: None,
            rotation: None,
        }
    }

    /// Builder: set initial velocity.
    pub fn with_velocity(mut self, velocity: Vector3<f32>) -> Self {
        self.velocity = velocity;
        self
    }

    /// Builder: set elasticity (clamped to `0.0..=1.0`).
    pub fn with_elasticity(mut self, elasticity: f32) -> Self {
        self.elasticity = elasticity.clamp(0.0, 1.0);
        self
    }

    /// Builder: set kinetic and static friction coefficients (negative values clamp to 0).
    pub fn with_friction(mut self, kinetic: f32, stat: f32) -> Self {
        self.kinetic_friction = kinetic.max(0.0);
        self.static_friction = stat.max(0.0);
        self
    }

    /// Builder: set world bounds.
    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Builder: make the body rotatable.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    #[inline]
    pub fn inv_mass(&self) -> f32 {
        1.0 / self.mass
    }
}

/// Tentative end-of-sub-step state, discarded on rollback.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Trial {
    center: Vector3<f32>,
    velocity: Vector3<f32>,
    dt: f32,
}

/// A simulated body.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    token: Token,
    guid: u128,
    pub sphere: Sphere,
    style: CollisionStyle,
    /// Host-defined classification (ball, hazard, pickup, ...).
    pub tag: u32,
    dynamics: Option<Dynamics>,
    force_accumulator: Vector3<f32>,
    trial: Option<Trial>,
}

impl Body {
    /// A plain body with a fresh token and `Standard` style.
    pub fn new(sphere: Sphere) -> Self {
        let token = Token::next();
        Self {
            token,
            guid: token.0 as u128,
            sphere,
            style: CollisionStyle::Standard,
            tag: 0,
            dynamics: None,
            force_accumulator: Vector3::zeros(),
            trial: None,
        }
    }

    /// Builder: set the persistent GUID used by scene save/load.
    pub fn with_guid(mut self, guid: u128) -> Self {
        self.guid = guid;
        self
    }

    /// Builder: set the collision style.
    pub fn with_style(mut self, style: CollisionStyle) -> Self {
        self.style = style;
        self
    }

    /// Builder: set the classification tag.
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    /// Builder: attach mass and velocity.
    pub fn with_dynamics(mut self, dynamics: Dynamics) -> Self {
        self.dynamics = Some(dynamics);
        self
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn guid(&self) -> u128 {
        self.guid
    }

    #[inline]
    pub fn style(&self) -> CollisionStyle {
        self.style
    }

    /// Change the collision style. A scheduler re-buckets the body on its next
    /// `prepare_for_new_timer_cycle`.
    pub fn set_style(&mut self, style: CollisionStyle) {
        self.style = style;
    }

    #[inline]
    pub fn dynamics(&self) -> Option<&Dynamics> {
        self.dynamics.as_ref()
    }

    #[inline]
    pub fn dynamics_mut(&mut self) -> Option<&mut Dynamics> {
        self.dynamics.as_mut()
    }

    #[inline]
    pub fn rotation(&self) -> Option<&Rotation> {
        self.dynamics.as_ref().and_then(|d| d.rotation.as_ref())
    }

    #[inline]
    pub fn rotation_mut(&mut self) -> Option<&mut Rotation> {
        self.dynamics.as_mut().and_then(|d| d.rotation.as_mut())
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.dynamics.is_some()
    }

    #[inline]
    pub fn is_rotatable(&self) -> bool {
        self.rotation().is_some()
    }

    /// Velocity, or zero for plain bodies.
    #[inline]
    pub fn velocity(&self) -> Vector3<f32> {
        self.dynamics.map_or(Vector3::zeros(), |d| d.velocity)
    }

    /// Linear momentum `m * v`, zero for plain bodies.
    pub fn momentum(&self) -> Vector3<f32> {
        self.dynamics.map_or(Vector3::zeros(), |d| d.velocity * d.mass)
    }

    /// Translational kinetic energy `0.5 * m * v²`.
    pub fn kinetic_energy(&self) -> f32 {
        self.dynamics
            .map_or(0.0, |d| 0.5 * d.mass * d.velocity.norm_squared())
    }

    /// Accumulate a force (applied to the next sub-steps of this cycle).
    #[inline]
    pub fn apply_force(&mut self, force: Vector3<f32>) {
        self.force_accumulator += force;
    }

    /// The sphere as seen by collision checks: trial position if one is pending.
    pub fn current_sphere(&self) -> Sphere {
        match self.trial {
            Some(trial) => Sphere {
                center: trial.center,
                radius: self.sphere.radius,
            },
            None => self.sphere,
        }
    }

    /// Reset per-cycle integration state.
    pub fn prepare_for_new_cycle(&mut self) {
        self.force_accumulator = Vector3::zeros();
        self.trial = None;
    }

    /// Tentatively advance by `dt` using semi-implicit Euler. Only `Standard`
    /// and `Ghost` bodies accelerate; stationary ones coast at their velocity.
    pub fn test_position(&mut self, dt: f32, gravity: Vector3<f32>) {
        let Some(dynamics) = self.dynamics.as_ref() else {
            return;
        };
        let mut velocity = dynamics.velocity;
        if !self.style.is_stationary() {
            velocity += (gravity + self.force_accumulator * dynamics.inv_mass()) * dt;
        }
        self.trial = Some(Trial {
            center: self.sphere.center + velocity * dt,
            velocity,
            dt,
        });
    }

    /// Throw away the pending trial.
    #[inline]
    pub fn discard_trial(&mut self) {
        self.trial = None;
    }

    /// Make the pending trial the committed state.
    pub fn commit(&mut self) {
        let Some(trial) = self.trial.take() else {
            return;
        };
        self.sphere.center = trial.center;
        if let Some(dynamics) = self.dynamics.as_mut() {
            dynamics.velocity = trial.velocity;
            if let Some(rotation) = dynamics.rotation.as_mut() {
                rotation.integrate_orientation(trial.dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn approx_vec_eq(a: &Vector3<f32>, b: &Vector3<f32>) -> bool {
        approx_eq(a.x, b.x) && approx_eq(a.y, b.y) && approx_eq(a.z, b.z)
    }

    fn ball(mass: f32) -> Body {
        Body::new(Sphere::new(Vector3::zeros(), 1.0)).with_dynamics(Dynamics::new(mass))
    }

    #[test]
    fn test_tokens_are_unique_and_ordered() {
        let a = Token::next();
        let b = Token::next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_body_defaults() {
        let body = Body::new(Sphere::new(Vector3::new(1.0, 2.0, 3.0), 4.0));
        assert_eq!(body.style(), CollisionStyle::Standard);
        assert!(!body.is_dynamic());
        assert!(!body.is_rotatable());
        assert_eq!(body.velocity(), Vector3::zeros());
        assert_eq!(body.kinetic_energy(), 0.0);
    }

    #[test]
    #[should_panic]
    fn test_zero_radius_panics() {
        Sphere::new(Vector3::zeros(), 0.0);
    }

    #[test]
    #[should_panic]
    fn test_negative_mass_panics() {
        Dynamics::new(-1.0);
    }

    #[test]
    fn test_builder_clamps() {
        let d = Dynamics::new(1.0).with_elasticity(2.0).with_friction(-1.0, 0.5);
        assert_eq!(d.elasticity, 1.0);
        assert_eq!(d.kinetic_friction, 0.0);
        assert_eq!(d.static_friction, 0.5);
    }

    #[test]
    fn test_style_predicates() {
        assert!(!CollisionStyle::Ghost.is_collidable());
        assert!(CollisionStyle::Stationary.is_collidable());
        assert!(CollisionStyle::StationaryRotatable.is_stationary());
        assert!(!CollisionStyle::Standard.is_stationary());
    }

    #[test]
    fn test_trial_then_commit() {
        let mut body = ball(2.0);
        body.dynamics_mut().unwrap().velocity = Vector3::new(3.0, 0.0, 0.0);
        body.test_position(2.0, Vector3::zeros());
        assert!(approx_vec_eq(&body.current_sphere().center, &Vector3::new(6.0, 0.0, 0.0)));
        assert_eq!(body.sphere.center, Vector3::zeros());
        body.commit();
        assert!(approx_vec_eq(&body.sphere.center, &Vector3::new(6.0, 0.0, 0.0)));
    }

    #[test]
    fn test_discard_trial_restores_position() {
        let mut body = ball(1.0);
        body.dynamics_mut().unwrap().velocity = Vector3::new(0.0, 1.0, 0.0);
        body.test_position(1.0, Vector3::zeros());
        body.discard_trial();
        assert_eq!(body.current_sphere().center, Vector3::zeros());
        body.commit();
        assert_eq!(body.sphere.center, Vector3::zeros());
    }

    #[test]
    fn test_force_and_gravity_semi_implicit() {
        let mut body = ball(2.0);
        body.apply_force(Vector3::new(4.0, 0.0, 0.0));
        body.test_position(1.0, Vector3::new(0.0, -10.0, 0.0));
        body.commit();
        // v = (0 + (F/m + g) * dt), x = v * dt
        assert!(approx_vec_eq(&body.velocity(), &Vector3::new(2.0, -10.0, 0.0)));
        assert!(approx_vec_eq(&body.sphere.center, &Vector3::new(2.0, -10.0, 0.0)));
    }

    #[test]
    fn test_stationary_coasts_without_acceleration() {
        let mut body = ball(1.0).with_style(CollisionStyle::Stationary);
        body.dynamics_mut().unwrap().velocity = Vector3::new(1.0, 0.0, 0.0);
        body.apply_force(Vector3::new(100.0, 0.0, 0.0));
        body.test_position(1.0, Vector3::new(0.0, -10.0, 0.0));
        body.commit();
        assert!(approx_vec_eq(&body.velocity(), &Vector3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_prepare_clears_force() {
        let mut body = ball(1.0);
        body.apply_force(Vector3::new(5.0, 0.0, 0.0));
        body.prepare_for_new_cycle();
        body.test_position(1.0, Vector3::zeros());
        body.commit();
        assert_eq!(body.velocity(), Vector3::zeros());
    }

    #[test]
    fn test_plain_body_never_moves() {
        let mut body = Body::new(Sphere::new(Vector3::zeros(), 1.0));
        body.test_position(1.0, Vector3::new(0.0, -10.0, 0.0));
        body.commit();
        assert_eq!(body.sphere.center, Vector3::zeros());
    }

    #[test]
    fn test_angular_momentum_refreshes_velocity() {
        let mut rot = Rotation::solid_sphere(1.0, 1.0);
        rot.add_angular_momentum(Vector3::new(0.0, 0.0, 0.4));
        // I = 0.4, so ω = L / I = 1
        assert!(approx_vec_eq(&rot.angular_velocity, &Vector3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_commit_integrates_orientation() {
        let mut body = Body::new(Sphere::new(Vector3::zeros(), 1.0)).with_dynamics(
            Dynamics::new(1.0).with_rotation(
                Rotation::solid_sphere(1.0, 1.0).with_angular_momentum(Vector3::new(0.0, 0.4, 0.0)),
            ),
        );
        body.test_position(0.1, Vector3::zeros());
        body.commit();
        let q = body.rotation().unwrap().orientation;
        assert!(q.angle() > 0.0);
    }

    #[test]
    fn test_momentum_and_energy() {
        let mut body = ball(2.0);
        body.dynamics_mut().unwrap().velocity = Vector3::new(3.0, 4.0, 0.0);
        assert!(approx_vec_eq(&body.momentum(), &Vector3::new(6.0, 8.0, 0.0)));
        assert!(approx_eq(body.kinetic_energy(), 25.0));
    }

    #[test]
    fn test_aabb_contains() {
        let b = Aabb::new(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(1.0, 1.0, 1.0));
        assert!(b.contains(&Vector3::zeros()));
        assert!(!b.contains(&Vector3::new(2.0, 0.0, 0.0)));
    }
}

#![no_std]
//! Sphere collision engine for small fixed-size worlds.
//!
//! - [`body`]: spheres, collision styles and the optional dynamic/rotatable
//!   state a body carries.
//! - [`geometry`]: intersection primitives (sphere, line, plane, triangle).
//! - [`handler`]: contact classification, pull-apart and impulse response.
//! - [`scheduler`]: [`SimpleMap`], which owns the bodies and advances them in
//!   adaptive sub-steps.
//!
//! # Example
//!
//! ```
//! use ballpit::{Body, CollisionStyle, Dynamics, SimpleMap, Sphere};
//! use nalgebra::Vector3;
//!
//! // Up to 16 bodies
//! let mut map: SimpleMap<16> = SimpleMap::new();
//! map.set_gravity(Vector3::new(0.0, -9.81, 0.0));
//!
//! let floor = Body::new(Sphere::new(Vector3::new(0.0, -101.0, 0.0), 100.0))
//!     .with_style(CollisionStyle::Stationary)
//!     .with_dynamics(Dynamics::new(1000.0));
//! map.add(floor).unwrap();
//!
//! let ball = Body::new(Sphere::new(Vector3::new(0.0, 2.0, 0.0), 0.5))
//!     .with_dynamics(Dynamics::new(1.0).with_elasticity(0.8));
//! let ball = map.add(ball).unwrap();
//!
//! for _ in 0..60 {
//!     map.prepare_for_new_timer_cycle();
//!     map.timer(1.0 / 60.0);
//! }
//! assert!(map.body(ball).unwrap().sphere.center.y < 2.0);
//! ```

pub mod body;
pub mod error;
pub mod geometry;
pub mod handler;
pub mod scheduler;
pub mod stats;

pub use body::{Aabb, Body, CollisionStyle, Dynamics, Rotation, Sphere, Token};
pub use error::{CollisionError, Result};
pub use handler::{CollisionDepth, CollisionHandler, HandlerSettings};
pub use scheduler::{
    CollisionListener, CollisionPair, FnListener, ListenerFn, PullApartMode, SimpleMap, TickPhase,
};
pub use stats::TickStats;

//! Static intersection primitives.
//!
//! Pure functions over spheres, lines and triangles. Nothing here mutates its
//! inputs; each test returns the hit point(s) or `None`. Degenerate input
//! (coincident centers, near-parallel lines, zero-area triangles) resolves to
//! `None` instead of producing NaN.
//!
//! The triangle-triangle test is Möller's interval overlap method
//! ("A Fast Triangle-Triangle Intersection Test", 1997) extended to report the
//! shared segment.

use nalgebra::Vector3;

// ComplexField provides sqrt()/abs() for f32 in no_std via libm
#[allow(unused_imports)]
use nalgebra::ComplexField;

use crate::body::Sphere;

/// Tolerance for near-zero denominators and plane distances.
pub const EPSILON: f32 = 1e-6;

/// Slack on barycentric coordinates: points this close to an edge are inside.
const EDGE_TOLERANCE: f32 = 1e-5;

/// A triangle in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Vector3<f32>,
    pub b: Vector3<f32>,
    pub c: Vector3<f32>,
}

impl Triangle {
    pub const fn new(a: Vector3<f32>, b: Vector3<f32>, c: Vector3<f32>) -> Self {
        Self { a, b, c }
    }

    #[inline]
    pub fn vertices(&self) -> [Vector3<f32>; 3] {
        [self.a, self.b, self.c]
    }

    /// Unnormalized normal `(b - a) × (c - a)`; its length is twice the area.
    #[inline]
    pub fn normal(&self) -> Vector3<f32> {
        (self.b - self.a).cross(&(self.c - self.a))
    }

    /// Whether the triangle has (numerically) zero area.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.normal().norm_squared() < EPSILON * EPSILON
    }
}

/// Sphere vs sphere.
///
/// Hits when the squared center distance is at most `(r1 + r2)²`. Returns the
/// point on sphere 1's surface toward sphere 2, pulled in by the penetration
/// fraction `(r1 + r2 - dist) / (r1 + r2)`. Coincident centers return sphere
/// 1's center.
pub fn sphere_sphere(first: &Sphere, second: &Sphere) -> Option<Vector3<f32>> {
    let diff = second.center - first.center;
    let dist_sq = diff.norm_squared();
    let sum_r = first.radius + second.radius;

    if dist_sq > sum_r * sum_r {
        return None;
    }

    let dist = dist_sq.sqrt();
    if dist < EPSILON {
        return Some(first.center);
    }

    let penetration = (sum_r - dist) / sum_r;
    Some(first.center + (diff / dist) * (first.radius * (1.0 - penetration)))
}

/// Sphere vs triangle. Returns the closest point on the triangle to the sphere
/// center when it lies within the radius.
pub fn sphere_triangle(sphere: &Sphere, triangle: &Triangle) -> Option<Vector3<f32>> {
    if triangle.is_degenerate() {
        return None;
    }

    let closest = closest_point_on_triangle(&sphere.center, triangle);
    if (closest - sphere.center).norm_squared() <= sphere.radius * sphere.radius {
        Some(closest)
    } else {
        None
    }
}

/// Closest point on a triangle to `point` (Voronoi region walk).
pub fn closest_point_on_triangle(point: &Vector3<f32>, triangle: &Triangle) -> Vector3<f32> {
    let Triangle { a, b, c } = *triangle;
    let ab = b - a;
    let ac = c - a;

    let ap = point - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = point - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = point - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let sum = va + vb + vc;
    if sum.abs() < EPSILON {
        return a;
    }
    let v = vb / sum;
    let w = vc / sum;
    a + ab * v + ac * w
}

/// Line vs the plane through a triangle.
///
/// The line is `start + t * direction`. With `segment_only` the hit must
/// satisfy `t ∈ [0, 1]`, i.e. lie between `start` and `start + direction`.
pub fn line_plane(
    start: &Vector3<f32>,
    direction: &Vector3<f32>,
    triangle: &Triangle,
    segment_only: bool,
) -> Option<Vector3<f32>> {
    let normal = triangle.normal();
    let denom = normal.dot(direction);
    if denom.abs() < EPSILON {
        return None;
    }

    let t = normal.dot(&(triangle.a - start)) / denom;
    if segment_only && !(0.0..=1.0).contains(&t) {
        return None;
    }

    Some(start + direction * t)
}

/// Line (or segment) vs triangle. Points within a small tolerance of an edge
/// count as inside.
pub fn line_triangle(
    start: &Vector3<f32>,
    direction: &Vector3<f32>,
    triangle: &Triangle,
    segment_only: bool,
) -> Option<Vector3<f32>> {
    let hit = line_plane(start, direction, triangle, segment_only)?;
    if point_in_triangle(&hit, triangle) {
        Some(hit)
    } else {
        None
    }
}

/// Barycentric inside test for a point already on the triangle's plane.
fn point_in_triangle(point: &Vector3<f32>, triangle: &Triangle) -> bool {
    let v0 = triangle.b - triangle.a;
    let v1 = triangle.c - triangle.a;
    let v2 = point - triangle.a;

    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);

    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < EPSILON {
        return false;
    }

    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    let u = 1.0 - v - w;
    u >= -EDGE_TOLERANCE && v >= -EDGE_TOLERANCE && w >= -EDGE_TOLERANCE
}

/// Triangle vs triangle.
///
/// Returns the two endpoints of the shared segment, or `None` when the
/// triangles don't touch. Coplanar triangles are only tested when
/// `include_coplanar` is set; the coplanar path reports the first two overlap
/// points found (the same point twice if only one exists).
pub fn triangle_triangle(
    first: &Triangle,
    second: &Triangle,
    include_coplanar: bool,
) -> Option<[Vector3<f32>; 2]> {
    let n2 = second.normal();
    let du = signed_distances(first, &n2, &second.a);
    if same_strict_sign(&du) {
        return None;
    }

    let n1 = first.normal();
    let dv = signed_distances(second, &n1, &first.a);
    if same_strict_sign(&dv) {
        return None;
    }

    let line_dir = n1.cross(&n2);
    if du.iter().all(|d| *d == 0.0) || line_dir.norm_squared() < EPSILON * EPSILON {
        return if include_coplanar {
            coplanar_overlap(first, second, &n1)
        } else {
            None
        };
    }

    // Project onto the axis along which the intersection line varies most
    let axis = dominant_axis(&line_dir);

    let (p1, q1) = plane_crossing(first, &du)?;
    let (p2, q2) = plane_crossing(second, &dv)?;

    let (lo1, hi1) = ordered(p1, q1, axis);
    let (lo2, hi2) = ordered(p2, q2, axis);

    let start = if lo1[axis] >= lo2[axis] { lo1 } else { lo2 };
    let end = if hi1[axis] <= hi2[axis] { hi1 } else { hi2 };

    if start[axis] > end[axis] + EPSILON {
        return None;
    }
    Some([start, end])
}

/// Signed distances of a triangle's vertices to a plane, snapped to zero
/// within tolerance.
fn signed_distances(
    triangle: &Triangle,
    normal: &Vector3<f32>,
    on_plane: &Vector3<f32>,
) -> [f32; 3] {
    let d = -normal.dot(on_plane);
    triangle.vertices().map(|v| {
        let dist = normal.dot(&v) + d;
        if dist.abs() < EPSILON {
            0.0
        } else {
            dist
        }
    })
}

#[inline]
fn same_strict_sign(d: &[f32; 3]) -> bool {
    d[0] * d[1] > 0.0 && d[0] * d[2] > 0.0
}

fn dominant_axis(v: &Vector3<f32>) -> usize {
    let (ax, ay, az) = (v.x.abs(), v.y.abs(), v.z.abs());
    if ax >= ay && ax >= az {
        0
    } else if ay >= az {
        1
    } else {
        2
    }
}

/// The two points where a triangle's edges cross the other triangle's plane.
///
/// Picks the vertex that sits alone on its side of the plane and walks the
/// two edges leaving it. `None` when all three distances are zero.
fn plane_crossing(
    triangle: &Triangle,
    d: &[f32; 3],
) -> Option<(Vector3<f32>, Vector3<f32>)> {
    let lone = if d[0] * d[1] > 0.0 {
        2
    } else if d[0] * d[2] > 0.0 {
        1
    } else if d[1] * d[2] > 0.0 || d[0] != 0.0 {
        0
    } else if d[1] != 0.0 {
        1
    } else if d[2] != 0.0 {
        2
    } else {
        return None;
    };

    let v = triangle.vertices();
    let j = (lone + 1) % 3;
    let k = (lone + 2) % 3;
    let cross = |other: usize| {
        let t = d[lone] / (d[lone] - d[other]);
        v[lone] + (v[other] - v[lone]) * t
    };
    Some((cross(j), cross(k)))
}

fn ordered(
    p: Vector3<f32>,
    q: Vector3<f32>,
    axis: usize,
) -> (Vector3<f32>, Vector3<f32>) {
    if p[axis] <= q[axis] {
        (p, q)
    } else {
        (q, p)
    }
}

/// Coplanar overlap: edge/edge crossings first, then contained vertices.
fn coplanar_overlap(
    first: &Triangle,
    second: &Triangle,
    normal: &Vector3<f32>,
) -> Option<[Vector3<f32>; 2]> {
    // Drop the dominant normal axis and work in the remaining 2D plane
    let drop = dominant_axis(normal);
    let (i0, i1) = match drop {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let flat = |v: &Vector3<f32>| (v[i0], v[i1]);

    let mut found: heapless::Vec<Vector3<f32>, 2> = heapless::Vec::new();
    let record = |p: Vector3<f32>, found: &mut heapless::Vec<Vector3<f32>, 2>| {
        if !found.iter().any(|q| (q - p).norm_squared() < EPSILON) {
            let _ = found.push(p);
        }
        found.is_full()
    };

    let va = first.vertices();
    let vb = second.vertices();
    for i in 0..3 {
        let (a0, a1) = (va[i], va[(i + 1) % 3]);
        for j in 0..3 {
            let (b0, b1) = (vb[j], vb[(j + 1) % 3]);
            if let Some(t) = segments_cross_2d(flat(&a0), flat(&a1), flat(&b0), flat(&b1)) {
                if record(a0 + (a1 - a0) * t, &mut found) {
                    return Some([found[0], found[1]]);
                }
            }
        }
    }

    for v in va {
        if point_in_triangle(&v, second) && record(v, &mut found) {
            return Some([found[0], found[1]]);
        }
    }
    for v in vb {
        if point_in_triangle(&v, first) && record(v, &mut found) {
            return Some([found[0], found[1]]);
        }
    }

    found.first().map(|p| [*p, *p])
}

/// 2D segment crossing; returns the parameter along `p0 → p1`.
fn segments_cross_2d(
    p0: (f32, f32),
    p1: (f32, f32),
    q0: (f32, f32),
    q1: (f32, f32),
) -> Option<f32> {
    let r = (p1.0 - p0.0, p1.1 - p0.1);
    let s = (q1.0 - q0.0, q1.1 - q0.1);
    let denom = r.0 * s.1 - r.1 * s.0;
    if denom.abs() < EPSILON {
        return None;
    }
    let qp = (q0.0 - p0.0, q0.1 - p0.1);
    let t = (qp.0 * s.1 - qp.1 * s.0) / denom;
    let u = (qp.0 * r.1 - qp.1 * r.0) / denom;
    let range = -EDGE_TOLERANCE..=1.0 + EDGE_TOLERANCE;
    if range.contains(&t) && range.contains(&u) {
        Some(t.clamp(0.0, 1.0))
    } else {
        None
    }
}

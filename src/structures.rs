use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn magnitude(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vector3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vector3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Self;

    fn mul(self, scale: f64) -> Self {
        Self::new(scale * self.x, scale * self.y, scale * self.z)
    }
}

impl Neg for Vector3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6}, {:.6})", self.x, self.y, self.z)
    }
}

/// A point mass. Its identity is its index in the body sequence.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vector3,
    pub velocity: Vector3,
    pub mass: f64,
}

impl Body {
    pub fn new(mass: f64, position: Vector3, velocity: Vector3) -> Self {
        Self {
            position,
            velocity,
            mass,
        }
    }

    pub fn validate(&self, index: usize) -> Result<()> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(Error::Domain(format!(
                "body {index} has non-positive mass {}",
                self.mass
            )));
        }
        if !(self.position.is_finite() && self.velocity.is_finite()) {
            return Err(Error::Domain(format!(
                "body {index} has a non-finite position or velocity"
            )));
        }
        Ok(())
    }
}

/// Physical constants and run length, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    pub gravitation_constant: f64,
    pub softening_radius: f64,
    pub time_step: f64,
    pub body_count: usize,
    pub step_count: usize,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.gravitation_constant.is_finite() && self.gravitation_constant > 0.0) {
            return Err(Error::Domain(format!(
                "gravitation constant must be positive, got {}",
                self.gravitation_constant
            )));
        }
        if !(self.softening_radius.is_finite() && self.softening_radius >= 0.0) {
            return Err(Error::Domain(format!(
                "softening radius must be non-negative, got {}",
                self.softening_radius
            )));
        }
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(Error::Domain(format!(
                "time step must be positive, got {}",
                self.time_step
            )));
        }
        if self.body_count == 0 {
            return Err(Error::Domain("at least one body is required".into()));
        }
        Ok(())
    }

    /// Validates the config together with the body sequence it drives.
    pub fn validate_bodies(&self, bodies: &[Body]) -> Result<()> {
        self.validate()?;
        if bodies.len() != self.body_count {
            return Err(Error::Domain(format!(
                "expected {} bodies, got {}",
                self.body_count,
                bodies.len()
            )));
        }
        bodies
            .iter()
            .enumerate()
            .try_for_each(|(index, body)| body.validate(index))
    }
}

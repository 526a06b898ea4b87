//! Task and solution files.
//!
//! A task is whitespace separated: `G r0 dt body_count step_count`, then one
//! `mass px py pz vx vy vz` record per body. Every token must parse; a bad or
//! missing token is reported with its 1-based position.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

use log::debug;

use crate::error::{Error, Result};
use crate::structures::{Body, SimulationConfig, Vector3};

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub config: SimulationConfig,
    pub bodies: Vec<Body>,
}

struct Tokens<'a> {
    inner: SplitWhitespace<'a>,
    position: usize,
}

impl Tokens<'_> {
    fn next<T: FromStr>(&mut self, what: &str) -> Result<T> {
        self.position += 1;
        let token = self.inner.next().ok_or_else(|| Error::Parse {
            position: self.position,
            message: format!("missing {what}"),
        })?;
        token.parse().map_err(|_| Error::Parse {
            position: self.position,
            message: format!("invalid {what} {token:?}"),
        })
    }

    fn vector(&mut self, what: &str) -> Result<Vector3> {
        Ok(Vector3::new(
            self.next(what)?,
            self.next(what)?,
            self.next(what)?,
        ))
    }
}

impl Task {
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Tokens {
            inner: text.split_whitespace(),
            position: 0,
        };
        let config = SimulationConfig {
            gravitation_constant: tokens.next("gravitation constant")?,
            softening_radius: tokens.next("softening radius")?,
            time_step: tokens.next("time step")?,
            body_count: tokens.next("body count")?,
            step_count: tokens.next("step count")?,
        };
        let bodies = (0..config.body_count)
            .map(|_| {
                let mass = tokens.next("mass")?;
                let position = tokens.vector("position")?;
                let velocity = tokens.vector("velocity")?;
                Ok(Body::new(mass, position, velocity))
            })
            .collect::<Result<Vec<_>>>()?;
        if tokens.inner.next().is_some() {
            debug!("ignoring tokens after body {}", config.body_count);
        }
        let task = Self { config, bodies };
        task.config.validate_bodies(&task.bodies)?;
        Ok(task)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("could not read task {}: {e}", path.display())))?;
        Self::parse(&text)
    }
}

/// Writes one `body { ... }` block per body, in order.
pub fn write_solution<W: Write>(writer: &mut W, bodies: &[Body]) -> io::Result<()> {
    for body in bodies {
        writeln!(
            writer,
            "body {{\n\t'mass': {:.6}\n\t'position': {}\n\t'velocity': {}\n}}",
            body.mass, body.position, body.velocity
        )?;
    }
    Ok(())
}

pub fn save_solution(path: impl AsRef<Path>, bodies: &[Body]) -> Result<()> {
    let path = path.as_ref();
    let io_error =
        |e: io::Error| Error::Config(format!("could not write solution {}: {e}", path.display()));
    let file = fs::File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    write_solution(&mut writer, bodies).map_err(io_error)?;
    writer.flush().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BODIES: &str = "1 0 0.01 2 1\n\
                              1 0 0 0 0 0 0\n\
                              1 1 0 0 0 0 0\n";

    #[test]
    fn parses_header_and_records() {
        let task = Task::parse(TWO_BODIES).unwrap();
        assert_eq!(task.config.gravitation_constant, 1.0);
        assert_eq!(task.config.softening_radius, 0.0);
        assert_eq!(task.config.time_step, 0.01);
        assert_eq!(task.config.body_count, 2);
        assert_eq!(task.config.step_count, 1);
        assert_eq!(task.bodies[1].position, Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn bad_token_reports_position() {
        let err = Task::parse("1 0 0.01 1 1\n1 0 zero 0 0 0 0").unwrap_err();
        assert!(matches!(err, Error::Parse { position: 8, .. }), "{err}");
    }

    #[test]
    fn truncated_file_is_rejected() {
        let err = Task::parse("1 0 0.01 2 1\n1 0 0 0 0 0 0\n1 1").unwrap_err();
        assert!(matches!(err, Error::Parse { position: 15, .. }), "{err}");
    }

    #[test]
    fn fractional_body_count_is_rejected() {
        assert!(matches!(
            Task::parse("1 0 0.01 2.5 1"),
            Err(Error::Parse { position: 4, .. })
        ));
    }

    #[test]
    fn non_positive_mass_is_a_domain_error() {
        assert!(matches!(
            Task::parse("1 0 0.01 1 1\n-1 0 0 0 0 0 0"),
            Err(Error::Domain(_))
        ));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            Task::load("/nonexistent/task.txt"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn solution_block_format() {
        let bodies = [Body::new(
            2.0,
            Vector3::new(1.0, 0.5, -3.0),
            Vector3::new(0.0, 0.25, 0.0),
        )];
        let mut out = Vec::new();
        write_solution(&mut out, &bodies).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "body {\n\
             \t'mass': 2.000000\n\
             \t'position': (1.000000, 0.500000, -3.000000)\n\
             \t'velocity': (0.000000, 0.250000, 0.000000)\n\
             }\n"
        );
    }
}

//! Seeded traffic demand generation.
//!
//! Both sessions of a run consume the same route file, so equal seeds
//! must produce byte-identical output. Departure times follow a Weibull
//! distribution with shape 2 (demand ramps up, peaks, and tails off),
//! rescaled onto `[0, max_ticks]`. Each vehicle takes a straight-through
//! route with probability `straight_ratio`, otherwise one of the eight
//! turning routes.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::DemandConfig;

/// Errors producing the demand input.
#[derive(Debug, thiserror::Error)]
pub enum DemandError {
    /// Failed to write the route file.
    #[error("failed to write route file {path}: {source}")]
    Write {
        /// Target path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A static route file does not exist.
    #[error("route file {path} does not exist")]
    Missing {
        /// Expected path.
        path: PathBuf,
    },
}

/// Something that can produce the route input for a run.
pub trait DemandSource: Send {
    /// Make the route file for `seed` available and return its path.
    ///
    /// # Errors
    ///
    /// Returns [`DemandError`] if the file cannot be produced.
    fn prepare(&mut self, seed: u64) -> Result<PathBuf, DemandError>;
}

/// Straight-through routes, as `(route id, edges)`.
pub const STRAIGHT_ROUTES: [(&str, &str); 4] = [
    ("W_E", "W2TL TL2E"),
    ("E_W", "E2TL TL2W"),
    ("N_S", "N2TL TL2S"),
    ("S_N", "S2TL TL2N"),
];

/// Turning routes, as `(route id, edges)`.
pub const TURN_ROUTES: [(&str, &str); 8] = [
    ("W_N", "W2TL TL2N"),
    ("W_S", "W2TL TL2S"),
    ("N_W", "N2TL TL2W"),
    ("N_E", "N2TL TL2E"),
    ("E_N", "E2TL TL2N"),
    ("E_S", "E2TL TL2S"),
    ("S_W", "S2TL TL2W"),
    ("S_E", "S2TL TL2E"),
];

/// One generated departure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Vehicle identifier.
    pub vehicle: String,
    /// Route identifier.
    pub route: &'static str,
    /// Departure tick.
    pub depart: u64,
}

/// Weibull-distributed route file generator.
#[derive(Debug, Clone)]
pub struct RouteFileGenerator {
    vehicles: u32,
    max_ticks: u64,
    straight_ratio: f64,
    path: PathBuf,
}

impl RouteFileGenerator {
    /// Generator writing to `config.route_file`.
    pub fn new(config: &DemandConfig, max_ticks: u64) -> Self {
        Self {
            vehicles: config.vehicles,
            max_ticks,
            straight_ratio: config.straight_ratio,
            path: config.route_file.clone(),
        }
    }

    /// Target path of the generated file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Departure schedule for `seed`, sorted by departure tick.
    pub fn departures(&self, seed: u64) -> Vec<Departure> {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut samples: Vec<f64> = (0..self.vehicles)
            .map(|_| {
                // Inverse CDF of Weibull(shape 2, scale 1).
                let u: f64 = rng.random::<f64>();
                (-(1.0 - u).ln()).sqrt()
            })
            .collect();
        samples.sort_by(f64::total_cmp);

        let lo = samples.first().copied().unwrap_or(0.0);
        let hi = samples.last().copied().unwrap_or(0.0);
        let span = hi - lo;
        let horizon = crate::metrics::count_as_f64(self.max_ticks);

        samples
            .iter()
            .enumerate()
            .map(|(index, &sample)| {
                let scaled = if span > 0.0 {
                    (sample - lo) / span * horizon
                } else {
                    0.0
                };
                let route = if rng.random::<f64>() < self.straight_ratio {
                    pick(&STRAIGHT_ROUTES, rng.random_range(0..STRAIGHT_ROUTES.len()))
                } else {
                    pick(&TURN_ROUTES, rng.random_range(0..TURN_ROUTES.len()))
                };
                Departure {
                    vehicle: format!("veh_{index}"),
                    route,
                    depart: tick_from_f64(scaled.round()),
                }
            })
            .collect()
    }

    /// Render the route file for `seed`.
    pub fn render(&self, seed: u64) -> String {
        let mut xml = String::from("<routes>\n");
        xml.push_str(
            "    <vType id=\"standard_car\" accel=\"1.0\" decel=\"4.5\" length=\"5.0\" \
             minGap=\"2.5\" maxSpeed=\"25\" sigma=\"0.5\"/>\n\n",
        );
        for (id, edges) in STRAIGHT_ROUTES.iter().chain(TURN_ROUTES.iter()) {
            xml.push_str(&format!("    <route id=\"{id}\" edges=\"{edges}\"/>\n"));
        }
        xml.push('\n');
        for departure in self.departures(seed) {
            xml.push_str(&format!(
                "    <vehicle id=\"{}\" type=\"standard_car\" route=\"{}\" depart=\"{}\" \
                 departLane=\"random\" departSpeed=\"10\"/>\n",
                departure.vehicle, departure.route, departure.depart
            ));
        }
        xml.push_str("</routes>\n");
        xml
    }
}

impl DemandSource for RouteFileGenerator {
    fn prepare(&mut self, seed: u64) -> Result<PathBuf, DemandError> {
        let xml = self.render(seed);
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| DemandError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, xml).map_err(|source| DemandError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!(
            path = %self.path.display(),
            vehicles = self.vehicles,
            seed,
            "Route file generated"
        );
        Ok(self.path.clone())
    }
}

/// Pre-existing route file used as is.
#[derive(Debug, Clone)]
pub struct StaticRoutes {
    path: PathBuf,
}

impl StaticRoutes {
    /// Use the file at `path`.
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl DemandSource for StaticRoutes {
    fn prepare(&mut self, _seed: u64) -> Result<PathBuf, DemandError> {
        if self.path.exists() {
            Ok(self.path.clone())
        } else {
            Err(DemandError::Missing {
                path: self.path.clone(),
            })
        }
    }
}

fn pick(routes: &[(&'static str, &'static str)], index: usize) -> &'static str {
    routes.get(index).map_or("W_E", |(id, _)| *id)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn tick_from_f64(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn generator(vehicles: u32) -> RouteFileGenerator {
        let config = DemandConfig {
            vehicles,
            ..DemandConfig::default()
        };
        RouteFileGenerator::new(&config, 5400)
    }

    #[test]
    fn same_seed_same_bytes() {
        let generator = generator(200);
        assert_eq!(generator.render(42), generator.render(42));
        assert_ne!(generator.render(42), generator.render(43));
    }

    #[test]
    fn departures_span_horizon_in_order() {
        let departures = generator(500).departures(7);
        assert_eq!(departures.len(), 500);
        assert_eq!(departures.first().unwrap().depart, 0);
        assert_eq!(departures.last().unwrap().depart, 5400);
        assert!(departures.windows(2).all(|w| w[0].depart <= w[1].depart));
    }

    #[test]
    fn straight_share_roughly_matches_ratio() {
        let departures = generator(2000).departures(1);
        let straight = departures
            .iter()
            .filter(|d| STRAIGHT_ROUTES.iter().any(|(id, _)| *id == d.route))
            .count();
        assert!((1300..=1700).contains(&straight), "straight = {straight}");
    }

    #[test]
    fn empty_demand_renders_routes_only() {
        let xml = generator(0).render(1);
        assert!(xml.contains("<route id=\"S_E\""));
        assert!(!xml.contains("<vehicle"));
    }

    #[test]
    fn one_line_per_route_and_vehicle() {
        let xml = generator(30).render(5);
        let lines: Vec<&str> = xml.lines().collect();
        assert_eq!(lines.iter().filter(|l| l.trim_start().starts_with("<vehicle")).count(), 30);
        assert_eq!(lines.iter().filter(|l| l.trim_start().starts_with("<route ")).count(), 12);
        assert!(lines.iter().all(|l| l.matches('<').count() <= 1));
        assert!(xml.ends_with("</routes>\n"));
    }

    #[test]
    fn static_routes_must_exist() {
        let mut missing = StaticRoutes::new(PathBuf::from("does/not/exist.rou.xml"));
        assert!(matches!(
            missing.prepare(0),
            Err(DemandError::Missing { .. })
        ));
    }
}

//! Synthetic dust sensor.

use embassy_time::Instant;

use sentinel_core::clock::{Clock, ManualClock};
use sentinel_core::sampling::SensorScaling;
use sentinel_core::sensors::{DustSensor, SensorError};

/// Clean-air sensor output in µg/m³ before calibration (0.6 V).
const DARK_OUTPUT: f64 = 102.0;

/// A pollution episode: ramps up to `peak` over `rise` seconds, holds,
/// then decays back over the same time.
#[derive(Debug, Clone, Copy)]
pub struct Episode {
    pub start_s: f64,
    pub rise_s: f64,
    pub hold_s: f64,
    pub peak: f64,
}

impl Episode {
    fn level(&self, t: f64) -> f64 {
        let into = t - self.start_s;
        if into < 0.0 {
            0.0
        } else if into < self.rise_s {
            self.peak * into / self.rise_s
        } else if into < self.rise_s + self.hold_s {
            self.peak
        } else {
            let decay = into - self.rise_s - self.hold_s;
            (self.peak * (1.0 - decay / self.rise_s)).max(0.0)
        }
    }
}

/// Produces converter counts for a scripted PM2.5 profile on the
/// simulator's virtual clock.
pub struct SyntheticSensor<'a> {
    clock: &'a ManualClock,
    scaling: SensorScaling,
    background: f64,
    episodes: Vec<Episode>,
    /// Every n-th cycle times out; 0 disables dropouts.
    dropout_every: u32,
    /// The sensor sits in filtered zero air over `[from, until)`.
    zero_air: Option<(Instant, Instant)>,
    cycles: u32,
}

impl<'a> SyntheticSensor<'a> {
    pub fn new(clock: &'a ManualClock, scaling: SensorScaling) -> Self {
        Self {
            clock,
            scaling,
            background: 6.0,
            episodes: Vec::new(),
            dropout_every: 0,
            zero_air: None,
            cycles: 0,
        }
    }

    pub fn with_episode(mut self, episode: Episode) -> Self {
        self.episodes.push(episode);
        self
    }

    pub fn with_dropouts(mut self, every: u32) -> Self {
        self.dropout_every = every;
        self
    }

    pub fn zero_air(mut self, from: Instant, until: Instant) -> Self {
        self.zero_air = Some((from, until));
        self
    }

    fn true_density(&self, now: Instant) -> f64 {
        if self
            .zero_air
            .is_some_and(|(from, until)| from <= now && now < until)
        {
            return 0.0;
        }
        let t = now.as_millis() as f64 / 1000.0;
        let episodes: f64 = self.episodes.iter().map(|e| e.level(t)).sum();
        self.background + episodes
    }
}

impl DustSensor for SyntheticSensor<'_> {
    fn read_counts(&mut self) -> Result<u16, SensorError> {
        self.cycles = self.cycles.wrapping_add(1);
        if self.dropout_every > 0 && self.cycles % self.dropout_every == 0 {
            return Err(SensorError::Timeout {
                sensor: "synthetic",
                operation: "adc",
            });
        }

        let now = self.clock.now();
        let t = now.as_millis() as f64 / 1000.0;
        let noise = 1.2 * (t * 7.3).sin() + 0.6 * (t * 19.1).cos();
        let density = (DARK_OUTPUT + self.true_density(now) + noise).max(0.0);

        let volts = density / self.scaling.ug_per_volt as f64;
        let counts = volts / self.scaling.reference_volts as f64 * self.scaling.adc_full_scale as f64;
        Ok(counts.round().clamp(0.0, self.scaling.adc_full_scale as f64) as u16)
    }
}

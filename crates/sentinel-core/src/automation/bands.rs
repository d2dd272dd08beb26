use core::fmt;

use serde::Serialize;
use thiserror_no_std::Error;

pub const BAND_COUNT: usize = 6;

/// Air quality category, ordered from cleanest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub const ALL: [AqiCategory; BAND_COUNT] = [
        Self::Good,
        Self::Moderate,
        Self::UnhealthySensitive,
        Self::Unhealthy,
        Self::VeryUnhealthy,
        Self::Hazardous,
    ];

    /// Short label that fits the status line.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::Moderate => "MODERATE",
            Self::UnhealthySensitive => "UNHEALTHY-S",
            Self::Unhealthy => "UNHEALTHY",
            Self::VeryUnhealthy => "V. UNHEALTHY",
            Self::Hazardous => "HAZARDOUS",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the band table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AqiBand {
    pub category: AqiCategory,
    /// Inclusive upper limit in µg/m³. `None` for the open-ended top band.
    pub upper: Option<f32>,
    /// Output driven while this band is active.
    pub actuator: usize,
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum BandTableError {
    #[error("band {index} upper limit is not a positive finite number")]
    InvalidLimit { index: usize },
    #[error("band {index} does not start above band {previous}")]
    Overlap { index: usize, previous: usize },
    #[error("band {index} is unbounded but is not the last band")]
    GapAfter { index: usize },
    #[error("the last band must be unbounded")]
    BoundedTop,
    #[error("actuator {actuator} is assigned to more than one band")]
    SharedActuator { actuator: usize },
    #[error("band {index} drives actuator {actuator} but the bank has {outputs} outputs")]
    MissingActuator {
        index: usize,
        actuator: usize,
        outputs: usize,
    },
}

/// Ordered partition of `[0, ∞)` into [`BAND_COUNT`] bands.
///
/// Band `i` covers `(upper[i - 1], upper[i]]`; the first band starts at 0.
#[derive(Debug, Clone, PartialEq)]
pub struct BandTable {
    bands: [AqiBand; BAND_COUNT],
}

impl BandTable {
    pub fn new(bands: [AqiBand; BAND_COUNT]) -> Result<Self, BandTableError> {
        for (index, band) in bands.iter().enumerate() {
            let last = index == BAND_COUNT - 1;
            match (band.upper, last) {
                (None, true) => {}
                (Some(_), true) => return Err(BandTableError::BoundedTop),
                (None, false) => return Err(BandTableError::GapAfter { index }),
                (Some(upper), false) => {
                    if !upper.is_finite() || upper <= 0.0 {
                        return Err(BandTableError::InvalidLimit { index });
                    }
                    if index > 0
                        && let Some(previous_upper) = bands[index - 1].upper
                        && upper <= previous_upper
                    {
                        return Err(BandTableError::Overlap {
                            index,
                            previous: index - 1,
                        });
                    }
                }
            }

            if bands[..index].iter().any(|b| b.actuator == band.actuator) {
                return Err(BandTableError::SharedActuator {
                    actuator: band.actuator,
                });
            }
        }

        Ok(Self { bands })
    }

    /// US EPA PM2.5 breakpoints, one actuator per band in order.
    ///
    /// Built without checks; [`BandTable::new`] validates a copy at startup.
    pub fn standard() -> Self {
        const UPPER: [Option<f32>; BAND_COUNT] = [
            Some(12.0),
            Some(35.4),
            Some(55.4),
            Some(150.4),
            Some(250.4),
            None,
        ];

        let mut bands = [AqiBand {
            category: AqiCategory::Good,
            upper: None,
            actuator: 0,
        }; BAND_COUNT];
        for (index, band) in bands.iter_mut().enumerate() {
            *band = AqiBand {
                category: AqiCategory::ALL[index],
                upper: UPPER[index],
                actuator: index,
            };
        }

        Self { bands }
    }

    /// Index of the band containing `value`. Negative values fall in the first band.
    pub fn classify(&self, value: f32) -> usize {
        self.bands
            .iter()
            .position(|b| b.upper.is_none_or(|upper| value <= upper))
            .unwrap_or(BAND_COUNT - 1)
    }

    pub fn band(&self, index: usize) -> Option<&AqiBand> {
        self.bands.get(index)
    }

    pub fn bands(&self) -> &[AqiBand; BAND_COUNT] {
        &self.bands
    }

    /// Exclusive lower limit of band `index`; 0 for the first band.
    pub fn lower_limit(&self, index: usize) -> f32 {
        match index {
            0 => 0.0,
            i => self.bands[i - 1].upper.unwrap_or(f32::INFINITY),
        }
    }

    pub fn upper_limit(&self, index: usize) -> Option<f32> {
        self.bands.get(index).and_then(|b| b.upper)
    }

    /// Every band must drive an output that exists in a bank of `outputs`.
    pub fn check_outputs(&self, outputs: usize) -> Result<(), BandTableError> {
        match self
            .bands
            .iter()
            .enumerate()
            .find(|(_, b)| b.actuator >= outputs)
        {
            Some((index, band)) => Err(BandTableError::MissingActuator {
                index,
                actuator: band.actuator,
                outputs,
            }),
            None => Ok(()),
        }
    }

    /// Width of the narrowest bounded band in µg/m³.
    pub fn narrowest_width(&self) -> f32 {
        (0..BAND_COUNT)
            .filter_map(|i| self.upper_limit(i).map(|upper| upper - self.lower_limit(i)))
            .fold(f32::INFINITY, f32::min)
    }
}

impl Default for BandTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_is_valid() {
        let table = BandTable::standard();
        assert_eq!(BandTable::new(*table.bands()), Ok(table));
    }

    #[test]
    fn test_in_band_values_select_their_band() {
        let table = BandTable::standard();
        let cases = [
            (0.0, AqiCategory::Good),
            (5.0, AqiCategory::Good),
            (12.0, AqiCategory::Good),
            (12.05, AqiCategory::Moderate),
            (14.22, AqiCategory::Moderate),
            (35.4, AqiCategory::Moderate),
            (40.0, AqiCategory::UnhealthySensitive),
            (100.0, AqiCategory::Unhealthy),
            (200.0, AqiCategory::VeryUnhealthy),
            (250.5, AqiCategory::Hazardous),
            (9_999.0, AqiCategory::Hazardous),
        ];

        for (value, expected) in cases {
            let index = table.classify(value);
            assert_eq!(table.bands()[index].category, expected, "value {}", value);
            assert_eq!(table.bands()[index].actuator, index);
        }
    }

    #[test]
    fn test_limits_partition_without_gaps() {
        let table = BandTable::standard();
        for index in 1..BAND_COUNT {
            assert_eq!(table.lower_limit(index), table.upper_limit(index - 1).unwrap());
        }
        assert_eq!(table.lower_limit(0), 0.0);
        assert_eq!(table.upper_limit(BAND_COUNT - 1), None);
    }

    #[test]
    fn test_overlapping_limits_are_rejected() {
        let mut bands = *BandTable::standard().bands();
        bands[2].upper = Some(30.0);
        assert_eq!(
            BandTable::new(bands),
            Err(BandTableError::Overlap {
                index: 2,
                previous: 1
            })
        );
    }

    #[test]
    fn test_unbounded_middle_band_is_rejected() {
        let mut bands = *BandTable::standard().bands();
        bands[3].upper = None;
        assert_eq!(
            BandTable::new(bands),
            Err(BandTableError::GapAfter { index: 3 })
        );
    }

    #[test]
    fn test_small_bank_is_rejected() {
        let table = BandTable::standard();
        assert_eq!(table.check_outputs(BAND_COUNT), Ok(()));
        assert_eq!(
            table.check_outputs(3),
            Err(BandTableError::MissingActuator {
                index: 3,
                actuator: 3,
                outputs: 3
            })
        );
    }

    #[test]
    fn test_narrowest_width_is_the_good_band() {
        assert_eq!(BandTable::standard().narrowest_width(), 12.0);
    }

    #[test]
    fn test_shared_actuator_is_rejected() {
        let mut bands = *BandTable::standard().bands();
        bands[4].actuator = 1;
        assert_eq!(
            BandTable::new(bands),
            Err(BandTableError::SharedActuator { actuator: 1 })
        );
    }
}

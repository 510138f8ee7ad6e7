//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-tick input values and the drain-once input container."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use r_ems_msg::Tick;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConversionError;
use crate::mapping::ColumnScheme;

/// Raw value as delivered by an external simulation: field name to number.
pub type ExternalValue = BTreeMap<String, f64>;

/// Primary (measured or forecast) value for one entity, shaped by its
/// [`ColumnScheme`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum PrimaryValue {
    /// Field `p`.
    ActivePower {
        /// Active power in kW.
        p_kw: f64,
    },
    /// Fields `p` and `q`.
    ApparentPower {
        /// Active power in kW.
        p_kw: f64,
        /// Reactive power in kvar.
        q_kvar: f64,
    },
    /// Field `h`.
    HeatDemand {
        /// Thermal demand in kW.
        q_dot_kw: f64,
    },
    /// Fields `p` and `h`.
    ActivePowerAndHeatDemand {
        /// Active power in kW.
        p_kw: f64,
        /// Thermal demand in kW.
        q_dot_kw: f64,
    },
    /// Fields `p`, `q` and `h`.
    ApparentPowerAndHeatDemand {
        /// Active power in kW.
        p_kw: f64,
        /// Reactive power in kvar.
        q_kvar: f64,
        /// Thermal demand in kW.
        q_dot_kw: f64,
    },
    /// Field `price`.
    EnergyPrice {
        /// Price in EUR/MWh.
        price_eur_per_mwh: f64,
    },
    /// Fields `v_mag` and `v_ang`.
    Voltage {
        /// Magnitude in p.u.
        v_mag_pu: f64,
        /// Angle in degrees.
        v_ang_deg: f64,
    },
}

impl PrimaryValue {
    /// Adapt a raw external value to the shape `scheme` prescribes. Extra
    /// fields are ignored.
    pub fn from_fields(
        scheme: ColumnScheme,
        value: &ExternalValue,
    ) -> Result<Self, ConversionError> {
        let field = |name: &'static str| -> Result<f64, ConversionError> {
            let raw = value
                .get(name)
                .copied()
                .ok_or(ConversionError::MissingField {
                    scheme,
                    field: name,
                })?;
            if raw.is_finite() {
                Ok(raw)
            } else {
                Err(ConversionError::NotFinite { field: name })
            }
        };
        Ok(match scheme {
            ColumnScheme::ActivePower => PrimaryValue::ActivePower { p_kw: field("p")? },
            ColumnScheme::ApparentPower => PrimaryValue::ApparentPower {
                p_kw: field("p")?,
                q_kvar: field("q")?,
            },
            ColumnScheme::HeatDemand => PrimaryValue::HeatDemand {
                q_dot_kw: field("h")?,
            },
            ColumnScheme::ActivePowerAndHeatDemand => PrimaryValue::ActivePowerAndHeatDemand {
                p_kw: field("p")?,
                q_dot_kw: field("h")?,
            },
            ColumnScheme::ApparentPowerAndHeatDemand => {
                PrimaryValue::ApparentPowerAndHeatDemand {
                    p_kw: field("p")?,
                    q_kvar: field("q")?,
                    q_dot_kw: field("h")?,
                }
            }
            ColumnScheme::EnergyPrice => PrimaryValue::EnergyPrice {
                price_eur_per_mwh: field("price")?,
            },
            ColumnScheme::Voltage => PrimaryValue::Voltage {
                v_mag_pu: field("v_mag")?,
                v_ang_deg: field("v_ang")?,
            },
        })
    }

    /// Column scheme this value conforms to.
    pub fn scheme(&self) -> ColumnScheme {
        match self {
            PrimaryValue::ActivePower { .. } => ColumnScheme::ActivePower,
            PrimaryValue::ApparentPower { .. } => ColumnScheme::ApparentPower,
            PrimaryValue::HeatDemand { .. } => ColumnScheme::HeatDemand,
            PrimaryValue::ActivePowerAndHeatDemand { .. } => {
                ColumnScheme::ActivePowerAndHeatDemand
            }
            PrimaryValue::ApparentPowerAndHeatDemand { .. } => {
                ColumnScheme::ApparentPowerAndHeatDemand
            }
            PrimaryValue::EnergyPrice { .. } => ColumnScheme::EnergyPrice,
            PrimaryValue::Voltage { .. } => ColumnScheme::Voltage,
        }
    }
}

/// Active and optional reactive power.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerValue {
    /// Active power in kW.
    pub p_kw: f64,
    /// Reactive power in kvar, if set.
    pub q_kvar: Option<f64>,
}

impl PowerValue {
    /// Active power only.
    pub fn active(p_kw: f64) -> Self {
        Self { p_kw, q_kvar: None }
    }
}

/// Set point for an energy management agent. `None` releases a previous set
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmSetPoint {
    /// Target power, `None` to release.
    pub power: Option<PowerValue>,
}

impl EmSetPoint {
    /// Set point targeting `power`.
    pub fn new(power: PowerValue) -> Self {
        Self { power: Some(power) }
    }

    /// Set point handing control back to the agent.
    pub fn release() -> Self {
        Self::default()
    }
}

/// Ask an agent to report its flexibility for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexRequest {
    /// Agent asking for the options.
    pub sender: Uuid,
}

/// Min/reference/max active power an agent can provide.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlexOptions {
    /// Agent the options belong to.
    pub model: Uuid,
    /// Power the agent plans without intervention.
    pub p_ref_kw: f64,
    /// Lowest reachable power.
    pub p_min_kw: f64,
    /// Highest reachable power.
    pub p_max_kw: f64,
}

/// Everything an external simulation hands to the host for one tick. Each
/// collection is drained at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtInputContainer {
    tick: Tick,
    next_tick: Option<Tick>,
    primary: BTreeMap<Uuid, PrimaryValue>,
    set_points: BTreeMap<Uuid, EmSetPoint>,
    flex_requests: BTreeMap<Uuid, FlexRequest>,
    flex_options: BTreeMap<Uuid, Vec<FlexOptions>>,
}

impl ExtInputContainer {
    /// Empty container for `tick`.
    pub fn new(tick: Tick, next_tick: Option<Tick>) -> Self {
        Self {
            tick,
            next_tick,
            ..Self::default()
        }
    }

    /// Tick the inputs belong to.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Next tick the external simulation provides inputs for.
    pub fn next_tick(&self) -> Option<Tick> {
        self.next_tick
    }

    /// Add or replace the primary value for `receiver`.
    pub fn add_primary_value(&mut self, receiver: Uuid, value: PrimaryValue) {
        self.primary.insert(receiver, value);
    }

    /// Add or replace the set point for `receiver`.
    pub fn add_set_point(&mut self, receiver: Uuid, set_point: EmSetPoint) {
        self.set_points.insert(receiver, set_point);
    }

    /// Add or replace the flex request addressed to `receiver`.
    pub fn add_flex_request(&mut self, receiver: Uuid, request: FlexRequest) {
        self.flex_requests.insert(receiver, request);
    }

    /// Append flex options addressed to `receiver`.
    pub fn add_flex_options(&mut self, receiver: Uuid, options: FlexOptions) {
        self.flex_options.entry(receiver).or_default().push(options);
    }

    /// Take all primary values, leaving the collection empty.
    pub fn extract_primary_data(&mut self) -> BTreeMap<Uuid, PrimaryValue> {
        std::mem::take(&mut self.primary)
    }

    /// Take all set points.
    pub fn extract_set_points(&mut self) -> BTreeMap<Uuid, EmSetPoint> {
        std::mem::take(&mut self.set_points)
    }

    /// Take all flex requests.
    pub fn extract_flex_requests(&mut self) -> BTreeMap<Uuid, FlexRequest> {
        std::mem::take(&mut self.flex_requests)
    }

    /// Take all flex options.
    pub fn extract_flex_options(&mut self) -> BTreeMap<Uuid, Vec<FlexOptions>> {
        std::mem::take(&mut self.flex_options)
    }

    /// `true` once every collection is drained.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
            && self.set_points.is_empty()
            && self.flex_requests.is_empty()
            && self.flex_options.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, f64)]) -> ExternalValue {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    #[test]
    fn converts_fields_per_scheme() {
        let value = PrimaryValue::from_fields(
            ColumnScheme::ApparentPower,
            &fields(&[("p", 4.2), ("q", 1.1), ("unused", 9.0)]),
        )
        .expect("complete value");
        assert_eq!(
            value,
            PrimaryValue::ApparentPower {
                p_kw: 4.2,
                q_kvar: 1.1
            }
        );
        assert_eq!(value.scheme(), ColumnScheme::ApparentPower);
    }

    #[test]
    fn missing_or_non_finite_fields_are_conversion_errors() {
        let err = PrimaryValue::from_fields(ColumnScheme::ApparentPower, &fields(&[("p", 1.0)]))
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::MissingField {
                scheme: ColumnScheme::ApparentPower,
                field: "q"
            }
        );

        let err = PrimaryValue::from_fields(ColumnScheme::EnergyPrice, &fields(&[("price", f64::NAN)]))
            .unwrap_err();
        assert_eq!(err, ConversionError::NotFinite { field: "price" });
    }

    #[test]
    fn extraction_drains_exactly_once() {
        let receiver = Uuid::new_v4();
        let mut container = ExtInputContainer::new(900, Some(1800));
        container.add_primary_value(receiver, PrimaryValue::ActivePower { p_kw: 3.0 });
        container.add_set_point(receiver, EmSetPoint::new(PowerValue::active(-2.0)));
        container.add_flex_request(receiver, FlexRequest { sender: receiver });
        assert!(!container.is_empty());

        assert_eq!(container.extract_primary_data().len(), 1);
        assert!(container.extract_primary_data().is_empty());
        assert!(!container.is_empty());

        assert_eq!(container.extract_set_points().len(), 1);
        assert!(container.extract_set_points().is_empty());
        assert_eq!(container.extract_flex_requests().len(), 1);
        assert!(container.is_empty());
        assert_eq!(container.tick(), 900);
        assert_eq!(container.next_tick(), Some(1800));
    }

    #[test]
    fn flex_options_accumulate_per_receiver() {
        let receiver = Uuid::new_v4();
        let mut container = ExtInputContainer::new(0, None);
        for p_ref_kw in [1.0, 2.0] {
            container.add_flex_options(
                receiver,
                FlexOptions {
                    model: receiver,
                    p_ref_kw,
                    p_min_kw: 0.0,
                    p_max_kw: 5.0,
                },
            );
        }
        let drained = container.extract_flex_options();
        assert_eq!(drained[&receiver].len(), 2);
        assert!(container.is_empty());
    }
}

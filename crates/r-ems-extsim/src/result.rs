//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Grid results handed back to external simulations."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use r_ems_msg::Tick;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExtSimError, Result};
use crate::mapping::{DataKind, EntityMapping};

/// Shape of a [`ResultEntity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Grid node: voltage magnitude and angle.
    Node,
    /// System participant: active and reactive power.
    Participant,
    /// Flexibility of an energy management agent.
    Flex,
    /// Line or transformer: port currents.
    Branch,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultKind::Node => "node",
            ResultKind::Participant => "participant",
            ResultKind::Flex => "flex",
            ResultKind::Branch => "branch",
        })
    }
}

/// One result computed by the host for one entity at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultEntity {
    /// See [`ResultKind::Node`].
    Node {
        /// Result tick.
        tick: Tick,
        /// Voltage magnitude in p.u.
        v_mag_pu: f64,
        /// Voltage angle in degrees.
        v_ang_deg: f64,
    },
    /// See [`ResultKind::Participant`].
    Participant {
        /// Result tick.
        tick: Tick,
        /// Active power in kW.
        p_kw: f64,
        /// Reactive power in kvar.
        q_kvar: f64,
    },
    /// See [`ResultKind::Flex`].
    Flex {
        /// Result tick.
        tick: Tick,
        /// Reference power in kW.
        p_ref_kw: f64,
        /// Minimum power in kW.
        p_min_kw: f64,
        /// Maximum power in kW.
        p_max_kw: f64,
    },
    /// See [`ResultKind::Branch`].
    Branch {
        /// Result tick.
        tick: Tick,
        /// Current magnitude at port A in amperes.
        i_a_mag_a: f64,
        /// Current magnitude at port B in amperes.
        i_b_mag_a: f64,
    },
}

impl ResultEntity {
    /// Shape of this result.
    pub fn kind(&self) -> ResultKind {
        match self {
            ResultEntity::Node { .. } => ResultKind::Node,
            ResultEntity::Participant { .. } => ResultKind::Participant,
            ResultEntity::Flex { .. } => ResultKind::Flex,
            ResultEntity::Branch { .. } => ResultKind::Branch,
        }
    }

    /// Tick the result was computed for.
    pub fn tick(&self) -> Tick {
        match self {
            ResultEntity::Node { tick, .. }
            | ResultEntity::Participant { tick, .. }
            | ResultEntity::Flex { tick, .. }
            | ResultEntity::Branch { tick, .. } => *tick,
        }
    }
}

/// Results keyed by entity. `K` is the internal UUID on the host side and the
/// external id after translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtResultContainer<K: Ord = Uuid> {
    tick: Tick,
    next_tick: Option<Tick>,
    results: BTreeMap<K, Vec<ResultEntity>>,
}

impl<K: Ord> Default for ExtResultContainer<K> {
    fn default() -> Self {
        Self {
            tick: 0,
            next_tick: None,
            results: BTreeMap::new(),
        }
    }
}

impl<K> ExtResultContainer<K>
where
    K: Ord + fmt::Display,
{
    /// Empty container for `tick`.
    pub fn new(tick: Tick, next_tick: Option<Tick>) -> Self {
        Self {
            tick,
            next_tick,
            results: BTreeMap::new(),
        }
    }

    /// Tick the results belong to.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Next tick the host will have results for.
    pub fn next_tick(&self) -> Option<Tick> {
        self.next_tick
    }

    /// Append a result for `entity`; earlier results are kept.
    pub fn add_result(&mut self, entity: K, result: ResultEntity) {
        self.results.entry(entity).or_default().push(result);
    }

    /// Drain every stored result.
    pub fn extract_results(&mut self) -> BTreeMap<K, Vec<ResultEntity>> {
        std::mem::take(&mut self.results)
    }

    /// Every result stored for `entity`, oldest first.
    pub fn results(&self, entity: &K) -> &[ResultEntity] {
        self.results.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entities with at least one stored result.
    pub fn entities(&self) -> impl Iterator<Item = &K> + '_ {
        self.results.keys()
    }

    /// `true` when no result is stored.
    pub fn is_empty(&self) -> bool {
        self.results.values().all(Vec::is_empty)
    }

    /// Most recent result for `entity`.
    fn latest(&self, entity: &K) -> Result<&ResultEntity> {
        self.results
            .get(entity)
            .and_then(|results| results.last())
            .ok_or_else(|| ExtSimError::MissingResult {
                entity: entity.to_string(),
            })
    }

    fn mismatch(quantity: &'static str, expected: ResultKind, actual: &ResultEntity) -> ExtSimError {
        ExtSimError::InvalidResultKind {
            quantity,
            expected,
            actual: actual.kind(),
        }
    }

    /// Active power of a participant result.
    pub fn active_power(&self, entity: &K) -> Result<f64> {
        match self.latest(entity)? {
            ResultEntity::Participant { p_kw, .. } => Ok(*p_kw),
            other => Err(Self::mismatch("active power", ResultKind::Participant, other)),
        }
    }

    /// Reactive power of a participant result.
    pub fn reactive_power(&self, entity: &K) -> Result<f64> {
        match self.latest(entity)? {
            ResultEntity::Participant { q_kvar, .. } => Ok(*q_kvar),
            other => Err(Self::mismatch("reactive power", ResultKind::Participant, other)),
        }
    }

    /// Voltage magnitude of a node result.
    pub fn voltage_magnitude(&self, entity: &K) -> Result<f64> {
        match self.latest(entity)? {
            ResultEntity::Node { v_mag_pu, .. } => Ok(*v_mag_pu),
            other => Err(Self::mismatch("voltage magnitude", ResultKind::Node, other)),
        }
    }

    /// Voltage angle of a node result.
    pub fn voltage_angle(&self, entity: &K) -> Result<f64> {
        match self.latest(entity)? {
            ResultEntity::Node { v_ang_deg, .. } => Ok(*v_ang_deg),
            other => Err(Self::mismatch("voltage angle", ResultKind::Node, other)),
        }
    }

    /// Reference power of a flex result.
    pub fn flex_reference_power(&self, entity: &K) -> Result<f64> {
        match self.latest(entity)? {
            ResultEntity::Flex { p_ref_kw, .. } => Ok(*p_ref_kw),
            other => Err(Self::mismatch("flex reference power", ResultKind::Flex, other)),
        }
    }
}

impl ExtResultContainer<Uuid> {
    /// Re-key by external id, looking entities up in `kinds` in order.
    /// Entities without a mapping are dropped and returned as rejected.
    pub fn into_external(
        self,
        mapping: &EntityMapping,
        kinds: &[DataKind],
    ) -> (ExtResultContainer<String>, Vec<String>) {
        let mut translated = ExtResultContainer::new(self.tick, self.next_tick);
        let mut rejected = Vec::new();
        for (uuid, results) in self.results {
            match mapping.uuid_to_id_in(kinds, uuid) {
                Some(id) => {
                    translated.results.insert(id.to_owned(), results);
                }
                None => rejected.push(uuid.to_string()),
            }
        }
        (translated, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEntry;

    #[test]
    fn accessors_read_matching_shapes() {
        let node = Uuid::new_v4();
        let load = Uuid::new_v4();
        let mut container = ExtResultContainer::new(900, None);
        container.add_result(
            node,
            ResultEntity::Node {
                tick: 900,
                v_mag_pu: 1.02,
                v_ang_deg: -0.4,
            },
        );
        container.add_result(
            load,
            ResultEntity::Participant {
                tick: 900,
                p_kw: 12.5,
                q_kvar: 0.8,
            },
        );

        assert_eq!(container.voltage_magnitude(&node).expect("node"), 1.02);
        assert_eq!(container.voltage_angle(&node).expect("node"), -0.4);
        assert_eq!(container.active_power(&load).expect("load"), 12.5);
        assert_eq!(container.reactive_power(&load).expect("load"), 0.8);
    }

    #[test]
    fn wrong_shape_is_reported_not_coerced() {
        let node = Uuid::new_v4();
        let mut container = ExtResultContainer::new(0, None);
        container.add_result(
            node,
            ResultEntity::Node {
                tick: 0,
                v_mag_pu: 1.0,
                v_ang_deg: 0.0,
            },
        );
        match container.active_power(&node) {
            Err(ExtSimError::InvalidResultKind {
                expected, actual, ..
            }) => {
                assert_eq!(expected, ResultKind::Participant);
                assert_eq!(actual, ResultKind::Node);
            }
            other => panic!("expected InvalidResultKind, got {other:?}"),
        }
        assert!(matches!(
            container.flex_reference_power(&Uuid::new_v4()),
            Err(ExtSimError::MissingResult { .. })
        ));
    }

    #[test]
    fn translation_keeps_mapped_entities_only() {
        let node = Uuid::new_v4();
        let stray = Uuid::new_v4();
        let mapping =
            EntityMapping::new([MappingEntry::new(node, "bus-3", DataKind::ResultGrid)])
                .expect("mapping");
        let mut container = ExtResultContainer::new(0, Some(900));
        let result = ResultEntity::Node {
            tick: 0,
            v_mag_pu: 0.98,
            v_ang_deg: 1.5,
        };
        container.add_result(node, result);
        container.add_result(stray, result);

        let (external, rejected) = container.into_external(&mapping, &DataKind::RESULTS);
        assert_eq!(external.results(&"bus-3".to_owned()), &[result]);
        assert_eq!(external.next_tick(), Some(900));
        assert_eq!(rejected, vec![stray.to_string()]);
    }

    #[test]
    fn extraction_empties_container() {
        let mut container = ExtResultContainer::new(0, None);
        container.add_result(
            Uuid::new_v4(),
            ResultEntity::Branch {
                tick: 0,
                i_a_mag_a: 10.0,
                i_b_mag_a: 9.5,
            },
        );
        assert_eq!(container.extract_results().len(), 1);
        assert!(container.extract_results().is_empty());
        assert!(container.is_empty());
    }
}

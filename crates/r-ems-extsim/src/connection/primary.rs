//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary data connection feeding measured values into the grid model."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use r_ems_msg::{Inbox, Tick};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::SignalLink;
use crate::container::{ExtInputContainer, ExternalValue, PrimaryValue};
use crate::error::{ConversionError, Result};
use crate::mapping::{log_unmapped, DataKind, EntityMapping};

/// Converted primary values for one tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvidePrimaryData {
    /// Tick the values apply to.
    pub tick: Tick,
    /// Values keyed by entity UUID.
    pub values: BTreeMap<Uuid, PrimaryValue>,
    /// Next tick data will be provided for.
    pub next_tick: Option<Tick>,
}

r_ems_msg::message_variants! {
    /// External simulation to primary data service. The host never answers.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum PrimaryDataMessage {
        /// Values for one tick.
        ProvidePrimaryData(ProvidePrimaryData) => "provide_primary_data",
    }
}

/// Host end of the one-way primary data channel.
pub type PrimaryDataHost = Inbox<PrimaryDataMessage>;

/// External end of the primary data service.
pub struct ExtPrimaryDataConnection {
    link: SignalLink<PrimaryDataMessage>,
    mapping: Arc<EntityMapping>,
}

impl ExtPrimaryDataConnection {
    pub(crate) fn new(link: SignalLink<PrimaryDataMessage>, mapping: Arc<EntityMapping>) -> Self {
        Self { link, mapping }
    }

    /// Convert raw values with each entity's column scheme and send them.
    ///
    /// Entities that are not mapped, have no scheme or fail conversion are
    /// skipped; their external ids are returned.
    pub fn provide_primary_data(
        &self,
        tick: Tick,
        values: BTreeMap<String, ExternalValue>,
        next_tick: Option<Tick>,
    ) -> Result<Vec<String>> {
        let translation = self.mapping.to_internal(DataKind::PrimaryInput, values);
        log_unmapped(self.link.name(), DataKind::PrimaryInput, &translation.rejected);
        let mut rejected = translation.rejected;

        let mut converted = BTreeMap::new();
        for (uuid, raw) in translation.mapped {
            match self.convert(uuid, &raw) {
                Ok(value) => {
                    converted.insert(uuid, value);
                }
                Err(err) => {
                    let id = self
                        .mapping
                        .uuid_to_id(DataKind::PrimaryInput, uuid)
                        .unwrap_or_default()
                        .to_owned();
                    warn!(
                        channel = self.link.name(),
                        id = %id,
                        error = %err,
                        "primary value could not be converted; entry skipped"
                    );
                    rejected.push(id);
                }
            }
        }

        self.link.send(ProvidePrimaryData {
            tick,
            values: converted,
            next_tick,
        })?;
        Ok(rejected)
    }

    fn convert(&self, uuid: Uuid, raw: &ExternalValue) -> std::result::Result<PrimaryValue, ConversionError> {
        let scheme = self
            .mapping
            .scheme(DataKind::PrimaryInput, uuid)
            .ok_or_else(|| ConversionError::NoScheme {
                entity: uuid.to_string(),
            })?;
        PrimaryValue::from_fields(scheme, raw)
    }

    /// Drain the primary values of `container` and send them.
    pub fn provide_input(&self, container: &mut ExtInputContainer) -> Result<()> {
        self.link.send(ProvidePrimaryData {
            tick: container.tick(),
            values: container.extract_primary_data(),
            next_tick: container.next_tick(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ColumnScheme, MappingEntry};
    use r_ems_msg::{DataServiceKind, OneWay, ScheduleDataService};

    #[test]
    fn converts_known_entities_and_reports_the_rest() {
        let load = Uuid::new_v4();
        let pv = Uuid::new_v4();
        let mapping = EntityMapping::new([
            MappingEntry::new(load, "load-1", DataKind::PrimaryInput)
                .with_scheme(ColumnScheme::ApparentPower),
            MappingEntry::new(pv, "pv-1", DataKind::PrimaryInput)
                .with_scheme(ColumnScheme::ActivePower),
        ])
        .expect("mapping");
        let (sender, host) = OneWay::<PrimaryDataMessage>::new("primary").split();
        let (signal, inbox) = OneWay::<ScheduleDataService>::new("data_services").split();
        let connection = ExtPrimaryDataConnection::new(
            SignalLink::new(sender, signal, DataServiceKind::PrimaryData),
            Arc::new(mapping),
        );

        let values = BTreeMap::from([
            (
                "load-1".to_owned(),
                ExternalValue::from([("p".to_owned(), 2.0), ("q".to_owned(), 0.5)]),
            ),
            ("pv-1".to_owned(), ExternalValue::from([("q".to_owned(), 1.0)])),
            ("ghost".to_owned(), ExternalValue::from([("p".to_owned(), 1.0)])),
        ]);
        let mut rejected = connection
            .provide_primary_data(0, values, Some(900))
            .expect("provide");
        rejected.sort();
        assert_eq!(rejected, vec!["ghost".to_owned(), "pv-1".to_owned()]);

        let PrimaryDataMessage::ProvidePrimaryData(message) = host.receive().expect("message");
        assert_eq!(
            message.values,
            BTreeMap::from([(
                load,
                PrimaryValue::ApparentPower {
                    p_kw: 2.0,
                    q_kvar: 0.5
                }
            )])
        );
        assert_eq!(inbox.drain().len(), 1);
    }
}

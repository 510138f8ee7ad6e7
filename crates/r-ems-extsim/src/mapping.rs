//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bijective id mapping between external simulations and the grid model."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Static lookup between external string ids and internal UUIDs.
//!
//! Entries are partitioned by [`DataKind`]; within one kind both the external
//! id and the UUID are unique. The mapping is immutable once built and is
//! shared between connections behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Category of exchanged data an entry may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Entities receiving primary data.
    PrimaryInput,
    /// Energy management agents.
    EmInput,
    /// Charging stations.
    EvInput,
    /// Communication endpoints.
    CommunicationInput,
    /// Grid nodes whose results are requested.
    ResultGrid,
    /// System participants whose results are requested.
    ResultParticipant,
    /// Flexibility providers whose results are requested.
    ResultFlex,
}

impl DataKind {
    /// Kinds whose entities may appear in result requests.
    pub const RESULTS: [DataKind; 3] = [
        DataKind::ResultGrid,
        DataKind::ResultParticipant,
        DataKind::ResultFlex,
    ];

    /// Token used in the `dataType` column.
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::PrimaryInput => "primary_input",
            DataKind::EmInput => "em_input",
            DataKind::EvInput => "ev_input",
            DataKind::CommunicationInput => "communication_input",
            DataKind::ResultGrid => "result_grid",
            DataKind::ResultParticipant => "result_participant",
            DataKind::ResultFlex => "result_flex",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the values an external simulation provides for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnScheme {
    /// Active power (`p`).
    #[serde(rename = "p")]
    ActivePower,
    /// Active and reactive power (`pq`).
    #[serde(rename = "pq")]
    ApparentPower,
    /// Heat demand (`h`).
    #[serde(rename = "h")]
    HeatDemand,
    /// Active power and heat demand (`ph`).
    #[serde(rename = "ph")]
    ActivePowerAndHeatDemand,
    /// Active and reactive power plus heat demand (`pqh`).
    #[serde(rename = "pqh")]
    ApparentPowerAndHeatDemand,
    /// Energy price (`c`).
    #[serde(rename = "c")]
    EnergyPrice,
    /// Voltage magnitude and angle (`v`).
    #[serde(rename = "v")]
    Voltage,
}

impl ColumnScheme {
    /// Token used in the `columnScheme` column.
    pub fn token(self) -> &'static str {
        match self {
            ColumnScheme::ActivePower => "p",
            ColumnScheme::ApparentPower => "pq",
            ColumnScheme::HeatDemand => "h",
            ColumnScheme::ActivePowerAndHeatDemand => "ph",
            ColumnScheme::ApparentPowerAndHeatDemand => "pqh",
            ColumnScheme::EnergyPrice => "c",
            ColumnScheme::Voltage => "v",
        }
    }

    /// Field names an external value must carry for this scheme.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            ColumnScheme::ActivePower => &["p"],
            ColumnScheme::ApparentPower => &["p", "q"],
            ColumnScheme::HeatDemand => &["h"],
            ColumnScheme::ActivePowerAndHeatDemand => &["p", "h"],
            ColumnScheme::ApparentPowerAndHeatDemand => &["p", "q", "h"],
            ColumnScheme::EnergyPrice => &["price"],
            ColumnScheme::Voltage => &["v_mag", "v_ang"],
        }
    }
}

impl fmt::Display for ColumnScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Internal id.
    pub uuid: Uuid,
    /// External id.
    pub id: String,
    /// Value shape, for primary data entities.
    #[serde(rename = "columnScheme", default)]
    pub column_scheme: Option<ColumnScheme>,
    /// Category the entry belongs to.
    #[serde(rename = "dataType")]
    pub data_kind: DataKind,
}

impl MappingEntry {
    /// Entry without a column scheme.
    pub fn new(uuid: Uuid, id: impl Into<String>, data_kind: DataKind) -> Self {
        Self {
            uuid,
            id: id.into(),
            column_scheme: None,
            data_kind,
        }
    }

    /// Attach a column scheme.
    pub fn with_scheme(mut self, scheme: ColumnScheme) -> Self {
        self.column_scheme = Some(scheme);
        self
    }
}

/// Failure building or loading an [`EntityMapping`].
#[derive(Debug, Error)]
pub enum MappingError {
    /// The same external id appears twice within one kind.
    #[error("external id '{id}' is mapped twice for {kind}")]
    DuplicateExternalId {
        /// Kind of the duplicate rows.
        kind: DataKind,
        /// Duplicated external id.
        id: String,
    },
    /// The same UUID appears twice within one kind.
    #[error("uuid {uuid} is mapped twice for {kind}")]
    DuplicateInternalId {
        /// Kind of the duplicate rows.
        kind: DataKind,
        /// Duplicated UUID.
        uuid: Uuid,
    },
    /// A row could not be parsed.
    #[error("mapping table is malformed: {0}")]
    Csv(#[from] csv::Error),
    /// The table could not be read.
    #[error("unable to read mapping table: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone)]
struct Category {
    by_external: HashMap<String, usize>,
    by_internal: HashMap<Uuid, usize>,
}

/// Immutable bidirectional id lookup partitioned by [`DataKind`].
#[derive(Debug, Default, Clone)]
pub struct EntityMapping {
    entries: Vec<MappingEntry>,
    categories: HashMap<DataKind, Category>,
}

impl EntityMapping {
    /// Build a mapping, rejecting duplicate ids within one kind.
    pub fn new(entries: impl IntoIterator<Item = MappingEntry>) -> Result<Self, MappingError> {
        let mut mapping = Self::default();
        for entry in entries {
            let index = mapping.entries.len();
            let category = mapping.categories.entry(entry.data_kind).or_default();
            if category.by_external.contains_key(&entry.id) {
                return Err(MappingError::DuplicateExternalId {
                    kind: entry.data_kind,
                    id: entry.id,
                });
            }
            if category.by_internal.contains_key(&entry.uuid) {
                return Err(MappingError::DuplicateInternalId {
                    kind: entry.data_kind,
                    uuid: entry.uuid,
                });
            }
            category.by_external.insert(entry.id.clone(), index);
            category.by_internal.insert(entry.uuid, index);
            mapping.entries.push(entry);
        }
        debug!(entries = mapping.entries.len(), "entity mapping built");
        Ok(mapping)
    }

    /// Load a mapping table with `uuid`, `id`, `columnScheme`, `dataType` columns.
    pub fn from_csv_path(path: impl AsRef<Path>, delimiter: u8) -> Result<Self, MappingError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading entity mapping");
        Self::from_reader(File::open(path)?, delimiter)
    }

    /// Load a mapping table from any reader.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, MappingError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .trim(Trim::All)
            .from_reader(reader);
        let entries = reader
            .deserialize::<MappingEntry>()
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// Number of entries across all kinds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one kind, in table order.
    pub fn entries(&self, kind: DataKind) -> impl Iterator<Item = &MappingEntry> + '_ {
        self.entries.iter().filter(move |e| e.data_kind == kind)
    }

    fn entry_by_id(&self, kind: DataKind, id: &str) -> Option<&MappingEntry> {
        let index = *self.categories.get(&kind)?.by_external.get(id)?;
        self.entries.get(index)
    }

    fn entry_by_uuid(&self, kind: DataKind, uuid: Uuid) -> Option<&MappingEntry> {
        let index = *self.categories.get(&kind)?.by_internal.get(&uuid)?;
        self.entries.get(index)
    }

    /// UUID for an external id of `kind`.
    pub fn id_to_uuid(&self, kind: DataKind, id: &str) -> Option<Uuid> {
        self.entry_by_id(kind, id).map(|e| e.uuid)
    }

    /// External id for a UUID of `kind`.
    pub fn uuid_to_id(&self, kind: DataKind, uuid: Uuid) -> Option<&str> {
        self.entry_by_uuid(kind, uuid).map(|e| e.id.as_str())
    }

    /// First match across several kinds, in the given order.
    pub fn id_to_uuid_in(&self, kinds: &[DataKind], id: &str) -> Option<Uuid> {
        kinds.iter().find_map(|kind| self.id_to_uuid(*kind, id))
    }

    /// First match across several kinds, in the given order.
    pub fn uuid_to_id_in(&self, kinds: &[DataKind], uuid: Uuid) -> Option<&str> {
        kinds.iter().find_map(|kind| self.uuid_to_id(*kind, uuid))
    }

    /// Column scheme of a UUID of `kind`, if one is recorded.
    pub fn scheme(&self, kind: DataKind, uuid: Uuid) -> Option<ColumnScheme> {
        self.entry_by_uuid(kind, uuid)
            .and_then(|e| e.column_scheme)
    }

    /// Re-key a map from external ids to UUIDs. Unknown ids are rejected one
    /// by one; the rest of the batch is kept.
    pub fn to_internal<V>(
        &self,
        kind: DataKind,
        values: BTreeMap<String, V>,
    ) -> Translation<Uuid, V> {
        let mut translation = Translation::new(kind);
        for (id, value) in values {
            match self.id_to_uuid(kind, &id) {
                Some(uuid) => {
                    translation.mapped.insert(uuid, value);
                }
                None => translation.rejected.push(id),
            }
        }
        translation
    }

    /// Re-key a map from UUIDs to external ids.
    pub fn to_external<V>(
        &self,
        kind: DataKind,
        values: BTreeMap<Uuid, V>,
    ) -> Translation<String, V> {
        let mut translation = Translation::new(kind);
        for (uuid, value) in values {
            match self.uuid_to_id(kind, uuid) {
                Some(id) => {
                    translation.mapped.insert(id.to_owned(), value);
                }
                None => translation.rejected.push(uuid.to_string()),
            }
        }
        translation
    }

    /// Resolve a list of external ids, returning the known UUIDs and the
    /// rejected ids.
    pub fn resolve_ids<S: AsRef<str>>(
        &self,
        kinds: &[DataKind],
        ids: &[S],
    ) -> (Vec<Uuid>, Vec<String>) {
        let mut resolved = Vec::with_capacity(ids.len());
        let mut rejected = Vec::new();
        for id in ids {
            match self.id_to_uuid_in(kinds, id.as_ref()) {
                Some(uuid) => resolved.push(uuid),
                None => rejected.push(id.as_ref().to_owned()),
            }
        }
        (resolved, rejected)
    }
}

/// Outcome of re-keying a batch: the translated entries plus the keys that
/// had no mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation<K, V> {
    /// Kind the keys were looked up in.
    pub kind: DataKind,
    /// Entries whose key was mapped.
    pub mapped: BTreeMap<K, V>,
    /// Keys without a mapping, rendered as strings.
    pub rejected: Vec<String>,
}

impl<K, V> Translation<K, V> {
    fn new(kind: DataKind) -> Self {
        Self {
            kind,
            mapped: BTreeMap::new(),
            rejected: Vec::new(),
        }
    }

    /// `true` when every key was mapped.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Report every rejected key at `warn`.
    pub fn log_rejected(&self, channel: &'static str) {
        log_unmapped(channel, self.kind, &self.rejected);
    }
}

pub(crate) fn log_unmapped(channel: &'static str, kind: DataKind, rejected: &[String]) {
    for id in rejected {
        warn!(channel, kind = %kind, id = %id, "entity not present in mapping; entry skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev_mapping() -> (EntityMapping, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mapping = EntityMapping::new([
            MappingEntry::new(a, "ev1", DataKind::EvInput),
            MappingEntry::new(b, "ev2", DataKind::EvInput),
        ])
        .expect("valid mapping");
        (mapping, a, b)
    }

    #[test]
    fn lookups_are_bijective_per_kind() {
        let (mapping, a, b) = ev_mapping();
        assert_eq!(mapping.id_to_uuid(DataKind::EvInput, "ev1"), Some(a));
        assert_eq!(mapping.id_to_uuid(DataKind::EvInput, "ev2"), Some(b));
        for entry in mapping.entries(DataKind::EvInput) {
            let uuid = mapping
                .id_to_uuid(DataKind::EvInput, &entry.id)
                .expect("mapped");
            assert_eq!(mapping.uuid_to_id(DataKind::EvInput, uuid), Some(entry.id.as_str()));
        }
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let (mapping, a, _) = ev_mapping();
        assert_eq!(mapping.id_to_uuid(DataKind::EvInput, "unknown"), None);
        assert_eq!(mapping.id_to_uuid(DataKind::PrimaryInput, "ev1"), None);
        assert_eq!(mapping.uuid_to_id(DataKind::EmInput, a), None);
    }

    #[test]
    fn same_external_id_may_repeat_across_kinds() {
        let mapping = EntityMapping::new([
            MappingEntry::new(Uuid::new_v4(), "load-1", DataKind::PrimaryInput),
            MappingEntry::new(Uuid::new_v4(), "load-1", DataKind::ResultParticipant),
        ]);
        assert!(mapping.is_ok());
    }

    #[test]
    fn duplicates_within_kind_are_rejected() {
        let uuid = Uuid::new_v4();
        let err = EntityMapping::new([
            MappingEntry::new(uuid, "a", DataKind::EmInput),
            MappingEntry::new(Uuid::new_v4(), "a", DataKind::EmInput),
        ])
        .unwrap_err();
        assert!(matches!(err, MappingError::DuplicateExternalId { .. }));

        let err = EntityMapping::new([
            MappingEntry::new(uuid, "a", DataKind::EmInput),
            MappingEntry::new(uuid, "b", DataKind::EmInput),
        ])
        .unwrap_err();
        assert!(matches!(err, MappingError::DuplicateInternalId { .. }));
    }

    #[test]
    fn translation_skips_only_unmapped_entries() {
        let (mapping, a, _) = ev_mapping();
        let values = BTreeMap::from([("ev1".to_owned(), 3_u32), ("ghost".to_owned(), 7)]);
        let translation = mapping.to_internal(DataKind::EvInput, values);
        assert_eq!(translation.mapped, BTreeMap::from([(a, 3)]));
        assert_eq!(translation.rejected, vec!["ghost".to_owned()]);
        assert!(!translation.is_complete());
    }

    #[test]
    fn parses_csv_with_optional_scheme() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let table = format!(
            "uuid;id;columnScheme;dataType\n{a};load-1;pq;primary_input\n{b};node-7;;result_grid\n"
        );
        let mapping = EntityMapping::from_reader(table.as_bytes(), b';').expect("parse table");
        assert_eq!(mapping.len(), 2);
        assert_eq!(
            mapping.scheme(DataKind::PrimaryInput, a),
            Some(ColumnScheme::ApparentPower)
        );
        assert_eq!(mapping.scheme(DataKind::ResultGrid, b), None);
        assert_eq!(mapping.uuid_to_id(DataKind::ResultGrid, b), Some("node-7"));
    }
}

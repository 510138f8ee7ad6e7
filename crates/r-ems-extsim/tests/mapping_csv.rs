//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "Loading entity mapping tables from disk."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::io::Write;

use anyhow::Result;
use r_ems_common::CoSimConfig;
use r_ems_extsim::{ColumnScheme, DataKind, EntityMapping, MappingError};
use uuid::Uuid;

#[test]
fn loads_table_with_configured_delimiter() -> Result<()> {
    let ev1 = Uuid::new_v4();
    let ev2 = Uuid::new_v4();
    let load = Uuid::new_v4();
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "uuid;id;columnScheme;dataType")?;
    writeln!(file, "{ev1};ev1;;ev_input")?;
    writeln!(file, "{ev2};ev2;;ev_input")?;
    writeln!(file, "{load};load-1;ph;primary_input")?;
    file.flush()?;

    let config: CoSimConfig = "[mapping]\ndelimiter = \";\"\n".parse()?;
    let mapping = EntityMapping::from_csv_path(file.path(), config.mapping.delimiter_byte()?)?;

    assert_eq!(mapping.len(), 3);
    assert_eq!(mapping.id_to_uuid(DataKind::EvInput, "ev1"), Some(ev1));
    assert_eq!(mapping.id_to_uuid(DataKind::EvInput, "ev2"), Some(ev2));
    assert_eq!(mapping.id_to_uuid(DataKind::EvInput, "unknown"), None);
    assert_eq!(
        mapping.scheme(DataKind::PrimaryInput, load),
        Some(ColumnScheme::ActivePowerAndHeatDemand)
    );
    Ok(())
}

#[test]
fn duplicate_rows_fail_the_load() -> Result<()> {
    let uuid = Uuid::new_v4();
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "uuid,id,columnScheme,dataType")?;
    writeln!(file, "{uuid},bus-1,,result_grid")?;
    writeln!(file, "{},bus-1,,result_grid", Uuid::new_v4())?;
    file.flush()?;

    let err = EntityMapping::from_csv_path(file.path(), b',').unwrap_err();
    assert!(matches!(
        err,
        MappingError::DuplicateExternalId {
            kind: DataKind::ResultGrid,
            ..
        }
    ));
    Ok(())
}

#[test]
fn unknown_category_is_a_parse_error() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "uuid,id,columnScheme,dataType")?;
    writeln!(file, "{},x,,weather_input", Uuid::new_v4())?;
    file.flush()?;

    assert!(matches!(
        EntityMapping::from_csv_path(file.path(), b','),
        Err(MappingError::Csv(_))
    ));
    assert!(matches!(
        EntityMapping::from_csv_path("does/not/exist.csv", b','),
        Err(MappingError::Io(_))
    ));
    Ok(())
}

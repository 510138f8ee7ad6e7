//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Result retrieval connection."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use r_ems_msg::{HostEndpoint, Tick};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DataLink;
use crate::error::Result;
use crate::mapping::{log_unmapped, DataKind, EntityMapping};
use crate::result::ExtResultContainer;

/// Ask for the results of `ids` at `tick`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestResults {
    /// Tick the results are wanted for.
    pub tick: Tick,
    /// Entities by UUID.
    pub ids: Vec<Uuid>,
}

/// Answer to [`RequestResults`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideResults {
    /// Results keyed by UUID.
    pub results: ExtResultContainer,
}

r_ems_msg::message_variants! {
    /// External simulation to result service.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum ResultsMessage {
        /// Result request.
        RequestResults(RequestResults) => "request_results",
    }
}

r_ems_msg::message_variants! {
    /// Result service to external simulation.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum ResultsResponse {
        /// Requested results.
        ProvideResults(ProvideResults) => "provide_results",
    }
}

/// Host end of the results channel.
pub type ResultsHost = HostEndpoint<ResultsMessage, ResultsResponse>;

/// External end of the results service.
pub struct ExtResultDataConnection {
    link: DataLink<ResultsMessage, ResultsResponse>,
    mapping: Arc<EntityMapping>,
}

impl ExtResultDataConnection {
    pub(crate) fn new(
        link: DataLink<ResultsMessage, ResultsResponse>,
        mapping: Arc<EntityMapping>,
    ) -> Self {
        Self { link, mapping }
    }

    /// Request results for internal ids and block until the host provides them.
    pub fn request_results(&self, tick: Tick, ids: &[Uuid]) -> Result<ExtResultContainer> {
        let response: ProvideResults = self.link.request(RequestResults {
            tick,
            ids: ids.to_vec(),
        })?;
        Ok(response.results)
    }

    /// Same as [`Self::request_results`] with external ids on both ends. Ids
    /// are looked up in the grid, participant and flex result categories.
    pub fn request_results_by_external<S: AsRef<str>>(
        &self,
        tick: Tick,
        ids: &[S],
    ) -> Result<ExtResultContainer<String>> {
        let (uuids, rejected) = self.mapping.resolve_ids(&DataKind::RESULTS, ids);
        log_unmapped(self.link.name(), DataKind::ResultGrid, &rejected);
        let results = self.request_results(tick, &uuids)?;
        let (results, rejected) = results.into_external(&self.mapping, &DataKind::RESULTS);
        log_unmapped(self.link.name(), DataKind::ResultGrid, &rejected);
        Ok(results)
    }
}

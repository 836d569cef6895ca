//! Per-host deployed revision map.

use gitdeploy_state::{Host, Revision};
use serde::Serialize;

/// Host → deployed revision, one entry per fleet host in fleet order.
///
/// `None` means the host has never been deployed to or its marker could not
/// be read. Built fresh per reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployedRevisionMap {
    entries: Vec<(Host, Option<Revision>)>,
}

impl DeployedRevisionMap {
    pub fn new(entries: Vec<(Host, Option<Revision>)>) -> Self {
        Self { entries }
    }

    /// Map where no host has a deployed revision.
    pub fn empty_fleet(hosts: &[Host]) -> Self {
        Self::new(hosts.iter().map(|h| (h.clone(), None)).collect())
    }

    pub fn get(&self, host: &Host) -> Option<&Revision> {
        self.entries
            .iter()
            .find(|(h, _)| h == host)
            .and_then(|(_, rev)| rev.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Host, Option<&Revision>)> {
        self.entries.iter().map(|(h, rev)| (h, rev.as_ref()))
    }

    /// Hosts with a known revision, in fleet order.
    pub fn deployed(&self) -> impl Iterator<Item = (&Host, &Revision)> {
        self.entries
            .iter()
            .filter_map(|(h, rev)| rev.as_ref().map(|rev| (h, rev)))
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.entries.iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

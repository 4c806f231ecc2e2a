//! Instrument registry: groups active Sitrad instruments by chamber

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::chamber::{classify, derive_key, InstrumentRole};
use crate::sitrad::{Instrument, InstrumentApi};

/// Instruments sharing one chamber key
#[derive(Debug, Clone, PartialEq)]
pub struct ChamberGroup {
    pub key: String,
    pub base: Option<Instrument>,
    pub pulp: Option<Instrument>,
}

impl ChamberGroup {
    fn new(key: String) -> Self {
        Self {
            key,
            base: None,
            pulp: None,
        }
    }
}

/// Fetch active instruments and group them by chamber key
///
/// Returns `None` when the registry cannot be read, and `Some` (possibly
/// empty) when it answered.
pub async fn fetch_chamber_groups<A: InstrumentApi + ?Sized>(
    api: &A,
) -> Option<Vec<ChamberGroup>> {
    match api.active_instruments().await {
        Ok(instruments) => {
            let groups = group_instruments(instruments);
            info!(chambers = groups.len(), "Instrument registry grouped");
            Some(groups)
        }
        Err(e) => {
            warn!(error = %e, "Instrument registry unavailable");
            None
        }
    }
}

/// Group instruments by derived key, in order of first appearance
///
/// Every instrument reserves a slot for its key, even when its name is
/// neither a base nor a pulp instrument. A later instrument of the same
/// role and key replaces the earlier one.
pub fn group_instruments(instruments: Vec<Instrument>) -> Vec<ChamberGroup> {
    let mut groups: Vec<ChamberGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for instrument in instruments {
        let key = derive_key(&instrument.name);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(ChamberGroup::new(key.clone()));
            groups.len() - 1
        });
        let group = &mut groups[slot];

        match classify(&instrument.name) {
            InstrumentRole::Base => {
                if let Some(previous) = &group.base {
                    warn!(
                        key = %key,
                        previous = previous.id,
                        replacement = instrument.id,
                        "Two base instruments share a chamber key"
                    );
                }
                group.base = Some(instrument);
            }
            InstrumentRole::Pulp => {
                if let Some(previous) = &group.pulp {
                    warn!(
                        key = %key,
                        previous = previous.id,
                        replacement = instrument.id,
                        "Two pulp instruments share a chamber key"
                    );
                }
                group.pulp = Some(instrument);
            }
            InstrumentRole::Unclassified => {
                debug!(id = instrument.id, name = %instrument.name, "Unclassified instrument");
            }
        }
    }

    groups
}

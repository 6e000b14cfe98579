//! Process-wide "implicit default write concern is majority" flag.

use concern_core::{DefaultsResult, InvariantError, WriteConcern};
use once_cell::sync::OnceCell;

/// Unset until startup decides, then fixed for the life of the process.
///
/// The deployment topology decides whether writes without an explicit
/// default are majority-acknowledged. Whoever knows the topology sets the
/// flag once; a later attempt to flip it is a programming error.
#[derive(Debug, Default)]
pub struct ImplicitMajorityFlag {
    cell: OnceCell<bool>,
}

impl ImplicitMajorityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the flag. Repeating the same value is accepted.
    pub fn set(&self, majority: bool) -> DefaultsResult<()> {
        let current = *self.cell.get_or_init(|| majority);
        if current != majority {
            tracing::error!(
                current,
                requested = majority,
                "Attempted to change the implicit default write concern"
            );
            return Err(InvariantError::ImplicitMajorityConflict {
                current,
                requested: majority,
            }
            .into());
        }
        Ok(())
    }

    /// `None` while unset.
    pub fn get(&self) -> Option<bool> {
        self.cell.get().copied()
    }

    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Write concern applied when no cluster-wide default is configured.
    ///
    /// `{w: "majority"}` if the flag is true, `{w: 1}` if false, `None` while unset.
    pub fn implicit_default_write_concern(&self) -> Option<WriteConcern> {
        self.get().map(|majority| {
            if majority {
                WriteConcern::majority()
            } else {
                WriteConcern::nodes(1)
            }
        })
    }
}

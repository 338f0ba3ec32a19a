//! Background worker lifecycle
//!
//! `Parsed → Installing → Installed → Activating → Activated`, with
//! `Redundant` when the install step fails.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl Lifecycle {
    pub fn is_active(self) -> bool {
        self == Lifecycle::Activated
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: Lifecycle) -> bool {
        use Lifecycle::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Redundant, Installing)
                | (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Activating, Activated)
        )
    }
}

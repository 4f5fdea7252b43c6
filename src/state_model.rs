//! Replica-role state machine.
//!
//! A replica walks `none -> secondary -> primary`. Only forward steps are
//! legal; demotions and unknown labels have no distance.

use std::fmt;

/// Distance from an observed role to a target role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    /// Observed role already equals the target.
    Reached,
    /// Number of forward transitions needed.
    Steps(u32),
    /// No forward path exists.
    Illegal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateModel {
    name: String,
    primary: String,
    secondary: String,
}

impl StateModel {
    pub fn new(
        name: impl Into<String>,
        primary: impl Into<String>,
        secondary: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }

    /// The `MasterSlave` model with `MASTER` and `SLAVE` labels.
    pub fn master_slave() -> Self {
        Self::new("MasterSlave", "MASTER", "SLAVE")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn secondary(&self) -> &str {
        &self.secondary
    }

    fn is_primary(&self, label: &str) -> bool {
        label.eq_ignore_ascii_case(&self.primary)
    }

    fn is_secondary(&self, label: &str) -> bool {
        label.eq_ignore_ascii_case(&self.secondary)
    }

    pub fn distance(&self, current: Option<&str>, target: &str) -> Distance {
        match current {
            Some(cur) if cur.eq_ignore_ascii_case(target) => Distance::Reached,
            None if self.is_secondary(target) => Distance::Steps(1),
            None if self.is_primary(target) => Distance::Steps(2),
            Some(cur) if self.is_secondary(cur) && self.is_primary(target) => Distance::Steps(1),
            _ => Distance::Illegal,
        }
    }

    /// The role reached by taking one legal forward step from `current`
    /// toward `target`, or `None` if no such step exists.
    pub fn next_step(&self, current: Option<&str>, target: &str) -> Option<&str> {
        match self.distance(current, target) {
            Distance::Steps(_) if current.is_none() => Some(&self.secondary),
            Distance::Steps(_) => Some(&self.primary),
            Distance::Reached | Distance::Illegal => None,
        }
    }
}

impl Default for StateModel {
    fn default() -> Self {
        Self::master_slave()
    }
}

impl fmt::Display for StateModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}/{})", self.name, self.primary, self.secondary)
    }
}

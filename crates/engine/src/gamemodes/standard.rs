//! Standard game mode.
//!
//! All behavior comes from the option table; the hooks keep their defaults.

use super::GameMode;

pub struct Standard {
    /// Preset name the mode was created for.
    name: String,
}

impl Standard {
    pub fn new(name: &str) -> Self {
        let name = if name.is_empty() { "ffa" } else { name };
        Self { name: name.to_string() }
    }
}

impl Default for Standard {
    fn default() -> Self {
        Self::new("ffa")
    }
}

impl GameMode for Standard {
    fn name(&self) -> &str {
        &self.name
    }
}

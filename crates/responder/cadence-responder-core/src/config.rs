//! Runtime configuration for responders.

use serde::{Deserialize, Serialize};

use cadence_message::EntityKey;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Receiver for link messages authored without one.
    pub net_client_key: Option<EntityKey>,
    /// Receiver added to sub-world messages.
    pub local_avatar: Option<EntityKey>,
    /// Emit a `debug!` line for every dispatched command.
    pub log_commands: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default() {
        let cfg: ResponderConfig = serde_json::from_str(r#"{ "net_client_key": 4 }"#).unwrap();
        assert_eq!(cfg.net_client_key, Some(EntityKey(4)));
        assert!(!cfg.log_commands);
    }
}

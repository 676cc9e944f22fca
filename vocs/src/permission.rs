use std::fmt;

use serde::{Deserialize, Serialize};

/// Loop permission of a role, strictly ordered.
///
/// "Granted" means the held permission is at least the requested one.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    None,
    Monitor,
    Listen,
    Send,
}

impl Permission {
    pub fn granted(self, requested: Permission) -> bool {
        self >= requested
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::Monitor => "monitor",
            Permission::Listen => "listen",
            Permission::Send => "send",
        }
    }

    /// Wire name to permission; anything unknown maps to `None`.
    pub fn from_name(name: &str) -> Permission {
        match name {
            "monitor" => Permission::Monitor,
            "listen" => Permission::Listen,
            "send" => Permission::Send,
            _ => Permission::None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Permission::None < Permission::Monitor);
        assert!(Permission::Monitor < Permission::Listen);
        assert!(Permission::Listen < Permission::Send);
    }

    #[test]
    fn test_granted() {
        assert!(Permission::Send.granted(Permission::Listen));
        assert!(Permission::Send.granted(Permission::Send));
        assert!(Permission::Listen.granted(Permission::None));
        assert!(!Permission::Listen.granted(Permission::Send));
        assert!(!Permission::None.granted(Permission::Monitor));
    }

    #[test]
    fn test_wire_names() {
        for permission in [
            Permission::None,
            Permission::Monitor,
            Permission::Listen,
            Permission::Send,
        ] {
            assert_eq!(Permission::from_name(permission.as_str()), permission);
        }
        assert_eq!(Permission::from_name("operator"), Permission::None);

        let json = serde_json::to_string(&Permission::Listen).unwrap();
        assert_eq!(json, "\"listen\"");
        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Permission::Listen);
    }
}

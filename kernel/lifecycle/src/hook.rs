use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The lifecycle point a handler is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    BeforeInit,
    Init,
    AfterInit,
    BeforeMount,
    Mounted,
    BeforeUnmount,
    Unmounted,
    BeforeDestroy,
    Destroyed,
    Error,
    /// Any hook name the kernel does not trigger itself.
    Custom(String),
}

impl LifecycleHook {
    pub fn as_str(&self) -> &str {
        match self {
            Self::BeforeInit => "beforeInit",
            Self::Init => "init",
            Self::AfterInit => "afterInit",
            Self::BeforeMount => "beforeMount",
            Self::Mounted => "mounted",
            Self::BeforeUnmount => "beforeUnmount",
            Self::Unmounted => "unmounted",
            Self::BeforeDestroy => "beforeDestroy",
            Self::Destroyed => "destroyed",
            Self::Error => "error",
            Self::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl From<&str> for LifecycleHook {
    fn from(name: &str) -> Self {
        match name {
            "beforeInit" => Self::BeforeInit,
            "init" => Self::Init,
            "afterInit" => Self::AfterInit,
            "beforeMount" => Self::BeforeMount,
            "mounted" => Self::Mounted,
            "beforeUnmount" => Self::BeforeUnmount,
            "unmounted" => Self::Unmounted,
            "beforeDestroy" => Self::BeforeDestroy,
            "destroyed" => Self::Destroyed,
            "error" => Self::Error,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for LifecycleHook {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LifecycleHook {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LifecycleHook {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for hook in [LifecycleHook::BeforeInit, LifecycleHook::Mounted, LifecycleHook::Error] {
            assert_eq!(LifecycleHook::from(hook.as_str()), hook);
        }
        let custom = LifecycleHook::from("routeChanged");
        assert!(custom.is_custom());
        assert_eq!(custom.to_string(), "routeChanged");
        assert_eq!(serde_json::to_string(&LifecycleHook::AfterInit).unwrap(), "\"afterInit\"");
    }
}

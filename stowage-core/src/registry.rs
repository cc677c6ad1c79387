/*!
Kind-keyed codec registries.

Codec kinds are closed enums with a `Custom` escape hatch; a registry maps a
kind to a shared trait object and tracks which kind is the default. The three
codec managers are thin wrappers around [`Registry`].
*/

use parking_lot::RwLock;
use std::fmt::Display;
use std::sync::Arc;

use crate::{Result, StowageError};

/// Declare a codec kind enum with string names, `Custom(String)`, `FromStr`,
/// `Display` and string-shaped serde.
macro_rules! codec_kind {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            /// A codec registered at runtime under its own name
            Custom(String),
        }

        impl $name {
            /// Every built-in kind, in priority order
            pub fn builtin() -> Vec<$name> {
                vec![$($name::$variant),+]
            }

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $label,)+
                    $name::Custom(name) => name,
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(match s {
                    $($label => $name::$variant,)+
                    other => $name::Custom(other.to_string()),
                })
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s.parse() {
                    Ok(kind) => kind,
                    Err(never) => match never {},
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let name = <String as serde::Deserialize>::deserialize(deserializer)?;
                Ok($name::from(name.as_str()))
            }
        }
    };
}

pub(crate) use codec_kind;

/// Ordered kind → codec map with a mutable default.
pub struct Registry<K, C: ?Sized> {
    family: &'static str,
    entries: RwLock<Vec<(K, Arc<C>)>>,
    default: RwLock<K>,
}

impl<K, C> Registry<K, C>
where
    K: Clone + Eq + Display,
    C: ?Sized,
{
    pub fn new(family: &'static str, default: K) -> Self {
        Self {
            family,
            entries: RwLock::new(Vec::new()),
            default: RwLock::new(default),
        }
    }

    /// Register a codec; re-registering a kind replaces it in place
    pub fn register(&self, kind: K, codec: Arc<C>) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = codec,
            None => entries.push((kind, codec)),
        }
    }

    pub fn unregister(&self, kind: &K) -> Option<Arc<C>> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|(k, _)| k == kind)?;
        Some(entries.remove(index).1)
    }

    pub fn get(&self, kind: &K) -> Option<Arc<C>> {
        self.entries
            .read()
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, codec)| Arc::clone(codec))
    }

    pub fn contains(&self, kind: &K) -> bool {
        self.entries.read().iter().any(|(k, _)| k == kind)
    }

    /// Look up a kind, failing with `UnknownCodec`
    pub fn require(&self, kind: &K) -> Result<Arc<C>> {
        self.get(kind).ok_or_else(|| StowageError::UnknownCodec {
            family: self.family,
            name: kind.to_string(),
        })
    }

    /// Resolve an explicit kind, or the default when none is given
    pub fn resolve(&self, kind: Option<&K>) -> Result<(K, Arc<C>)> {
        let kind = match kind {
            Some(kind) => kind.clone(),
            None => self.default_kind(),
        };
        let codec = self.require(&kind)?;
        Ok((kind, codec))
    }

    pub fn default_kind(&self) -> K {
        self.default.read().clone()
    }

    /// Change the default; the kind must already be registered
    pub fn set_default(&self, kind: K) -> Result<()> {
        self.require(&kind)?;
        *self.default.write() = kind;
        Ok(())
    }

    /// Registered kinds in registration order
    pub fn kinds(&self) -> Vec<K> {
        self.entries.read().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Snapshot of every registered codec
    pub fn entries(&self) -> Vec<(K, Arc<C>)> {
        self.entries
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), Arc::clone(c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    codec_kind!(
        /// Test kinds
        Flavor {
            Plain => "plain",
            Spicy => "spicy",
        }
    );

    #[test]
    fn test_kind_names_round_trip() {
        assert_eq!(Flavor::from("spicy"), Flavor::Spicy);
        assert_eq!(Flavor::from("smoky"), Flavor::Custom("smoky".to_string()));
        assert_eq!(Flavor::Custom("smoky".into()).to_string(), "smoky");
        assert_eq!(serde_json::to_string(&Flavor::Plain).unwrap(), "\"plain\"");
        let parsed: Flavor = serde_json::from_str("\"spicy\"").unwrap();
        assert_eq!(parsed, Flavor::Spicy);
    }

    #[test]
    fn test_register_replace_and_default() {
        let registry: Registry<Flavor, str> = Registry::new("flavor", Flavor::Plain);
        registry.register(Flavor::Plain, Arc::from("v1"));
        registry.register(Flavor::Spicy, Arc::from("hot"));
        registry.register(Flavor::Plain, Arc::from("v2"));

        assert_eq!(registry.kinds(), vec![Flavor::Plain, Flavor::Spicy]);
        assert_eq!(&*registry.require(&Flavor::Plain).unwrap(), "v2");

        let (kind, codec) = registry.resolve(None).unwrap();
        assert_eq!(kind, Flavor::Plain);
        assert_eq!(&*codec, "v2");

        assert!(registry.set_default(Flavor::Custom("none".into())).is_err());
        registry.set_default(Flavor::Spicy).unwrap();
        assert_eq!(registry.default_kind(), Flavor::Spicy);
    }

    #[test]
    fn test_unregister_makes_lookup_fail() {
        let registry: Registry<Flavor, str> = Registry::new("flavor", Flavor::Plain);
        registry.register(Flavor::Spicy, Arc::from("hot"));

        assert!(registry.unregister(&Flavor::Spicy).is_some());
        let err = registry.require(&Flavor::Spicy).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_CODEC");
        assert!(registry.resolve(None).is_err());
    }
}

//! Macros for defining prefixed ID types.

/// Macro to define a typed ID with a reserved string prefix.
///
/// This generates a newtype wrapper around the full ID string with:
/// - A `PREFIX` constant
/// - `from_suffix()` to build an ID from its unprefixed part
/// - `parse()` to parse (and validate) a full ID string
/// - `is_prefixed()` to cheaply test foreign strings for the prefix
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(ServiceId, "doko-svc-");
///
/// let id = ServiceId::from_suffix("0123456789ab")?;
/// let parsed: ServiceId = "doko-svc-0123456789ab".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// A typed ID carrying its reserved prefix.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The prefix for this ID type.
            pub const PREFIX: &'static str = $prefix;

            /// Creates an ID by prepending the prefix to `suffix`.
            pub fn from_suffix(suffix: &str) -> Result<Self, $crate::IdError> {
                if suffix.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                if suffix.chars().any(char::is_whitespace) {
                    return Err($crate::IdError::Whitespace {
                        id: suffix.to_string(),
                    });
                }
                Ok(Self(format!("{}{}", Self::PREFIX, suffix)))
            }

            /// Parses an ID from a string.
            ///
            /// The string must be in the format `{prefix}{suffix}` with a
            /// non-empty suffix.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                let Some(suffix) = s.strip_prefix(Self::PREFIX) else {
                    return Err($crate::IdError::MissingPrefix {
                        expected: Self::PREFIX,
                        actual: s.to_string(),
                    });
                };

                Self::from_suffix(suffix)
            }

            /// Returns true if `s` carries this type's prefix.
            #[must_use]
            pub fn is_prefixed(s: &str) -> bool {
                s.len() > Self::PREFIX.len() && s.starts_with(Self::PREFIX)
            }

            /// Returns the full ID string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns the ID without its prefix.
            #[must_use]
            pub fn suffix(&self) -> &str {
                &self.0[Self::PREFIX.len()..]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

//! Common macros for implementing ID wrapper types.

/// String-backed identifiers (backend locators, upload session ids).
macro_rules! impl_string_id {
    ($($name:ident),* $(,)?) => {
        $(
            impl $name {
                pub fn from_string(s: String) -> Self {
                    Self(s)
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }

                pub fn into_inner(self) -> String {
                    self.0
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }
        )*
    };
}

/// Integer-backed identifiers assigned by the owner/item layer.
macro_rules! impl_numeric_id {
    ($($name:ident($inner:ty)),* $(,)?) => {
        $(
            impl $name {
                pub const fn new(value: $inner) -> Self {
                    Self(value)
                }

                pub const fn value(self) -> $inner {
                    self.0
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<$inner> for $name {
                fn from(value: $inner) -> Self {
                    Self(value)
                }
            }
        )*
    };
}

pub(crate) use impl_numeric_id;
pub(crate) use impl_string_id;

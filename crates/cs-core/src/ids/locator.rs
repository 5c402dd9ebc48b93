use serde::{Deserialize, Serialize};

use super::id_macro::impl_string_id;

/// Backend-defined string identifying stored bytes remotely.
///
/// The content store never parses a locator; only the adapter that issued
/// it knows its structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl_string_id!(Locator);

//! Identifier wrappers for engine-side names and run identities.
//!
//! The simulation engine names intersections, lanes, edges, and vehicles
//! with opaque strings. Wrapping each in its own newtype keeps a lane id
//! from being handed to a vehicle query by accident. Runs are identified
//! by UUID v7 so reports sort by start time.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around an engine-assigned string name.
macro_rules! define_name {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an engine-assigned name.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Borrow the raw engine name.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }
    };
}

define_name! {
    /// Engine name of a signalized intersection (traffic light system).
    IntersectionId
}

define_name! {
    /// Engine name of a lane, conventionally `<edge>_<index>`.
    LaneId
}

define_name! {
    /// Engine name of a road edge (a bundle of parallel lanes).
    EdgeId
}

define_name! {
    /// Engine name of a vehicle.
    VehicleId
}

impl LaneId {
    /// Lane index within its edge, parsed from the `_<index>` suffix.
    ///
    /// Returns `None` when the name carries no numeric suffix.
    pub fn index(&self) -> Option<u32> {
        self.0
            .rsplit_once('_')
            .and_then(|(_, suffix)| suffix.parse().ok())
    }
}

/// Unique identifier for one orchestrated comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_index_from_suffix() {
        assert_eq!(LaneId::from("W2TL_0").index(), Some(0));
        assert_eq!(LaneId::from("W2TL_3").index(), Some(3));
        assert_eq!(LaneId::from(":TL_w0_12").index(), Some(12));
    }

    #[test]
    fn lane_index_missing_suffix() {
        assert_eq!(LaneId::from("W2TL").index(), None);
        assert_eq!(LaneId::from("W2TL_x").index(), None);
    }

    #[test]
    fn names_display_raw() {
        let id = IntersectionId::new("TL");
        assert_eq!(id.to_string(), "TL");
        assert_eq!(id.as_str(), "TL");
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}

//! The eleven derivative dispatch strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PyrError;

/// Derivative strategy selected per benchmark configuration.
///
/// Discriminants are the stable numeric ids used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// Separable pair, two passes through a scratch surface.
    SingleSeparation = 1,
    /// One complete kernel per axis.
    Single = 2,
    /// Both axes in one launch.
    Double = 3,
    /// Both axes, separable, three launches.
    DoubleSeparation = 4,
    SingleLocal = 6,
    SingleSeparationLocal = 7,
    DoubleLocal = 9,
    /// Coefficients baked into the program.
    SinglePredefined = 11,
    DoublePredefined = 12,
    SinglePredefinedLocal = 13,
    DoublePredefinedLocal = 14,
}

impl Method {
    pub const ALL: [Method; 11] = [
        Method::SingleSeparation,
        Method::Single,
        Method::Double,
        Method::DoubleSeparation,
        Method::SingleLocal,
        Method::SingleSeparationLocal,
        Method::DoubleLocal,
        Method::SinglePredefined,
        Method::DoublePredefined,
        Method::SinglePredefinedLocal,
        Method::DoublePredefinedLocal,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::SingleSeparation => "singleSeparation",
            Method::Single => "single",
            Method::Double => "double",
            Method::DoubleSeparation => "doubleSeparation",
            Method::SingleLocal => "singleLocal",
            Method::SingleSeparationLocal => "singleSeparationLocal",
            Method::DoubleLocal => "doubleLocal",
            Method::SinglePredefined => "singlePredefined",
            Method::DoublePredefined => "doublePredefined",
            Method::SinglePredefinedLocal => "singlePredefinedLocal",
            Method::DoublePredefinedLocal => "doublePredefinedLocal",
        }
    }

    /// Computes both axes in one engine call.
    pub fn is_double(self) -> bool {
        matches!(
            self,
            Method::Double
                | Method::DoubleSeparation
                | Method::DoubleLocal
                | Method::DoublePredefined
                | Method::DoublePredefinedLocal
        )
    }

    pub fn is_predefined(self) -> bool {
        matches!(
            self,
            Method::SinglePredefined
                | Method::DoublePredefined
                | Method::SinglePredefinedLocal
                | Method::DoublePredefinedLocal
        )
    }

    /// Dispatched with a 16×16 work-group.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            Method::SingleLocal
                | Method::SingleSeparationLocal
                | Method::DoubleLocal
                | Method::SinglePredefinedLocal
                | Method::DoublePredefinedLocal
        )
    }

    pub fn is_separated(self) -> bool {
        matches!(
            self,
            Method::SingleSeparation | Method::DoubleSeparation | Method::SingleSeparationLocal
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = PyrError;

    /// Accepts the camelCase name or the numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u32>() {
            return Method::from_id(id)
                .ok_or_else(|| PyrError::Config(format!("unknown method id {id}")));
        }
        Method::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PyrError::Config(format!("unknown method '{s}'")))
    }
}

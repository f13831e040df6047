//! Diabetic retinopathy severity stages.
//!
//! Stage identifiers follow the International Clinical Diabetic Retinopathy
//! Disease Severity Scale as returned by the remote classifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ClassifyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "No_DR")]
    NoDr,
    #[serde(rename = "Mild")]
    Mild,
    #[serde(rename = "Moderate")]
    Moderate,
    #[serde(rename = "Severe")]
    Severe,
    #[serde(rename = "Proliferative_DR")]
    ProliferativeDr,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::NoDr,
        Stage::Mild,
        Stage::Moderate,
        Stage::Severe,
        Stage::ProliferativeDr,
    ];

    /// Wire identifier used by the classification endpoint.
    pub fn id(self) -> &'static str {
        match self {
            Stage::NoDr => "No_DR",
            Stage::Mild => "Mild",
            Stage::Moderate => "Moderate",
            Stage::Severe => "Severe",
            Stage::ProliferativeDr => "Proliferative_DR",
        }
    }

    pub fn info(self) -> &'static StageInfo {
        match self {
            Stage::NoDr => &CATALOGUE[0],
            Stage::Mild => &CATALOGUE[1],
            Stage::Moderate => &CATALOGUE[2],
            Stage::Severe => &CATALOGUE[3],
            Stage::ProliferativeDr => &CATALOGUE[4],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Stage {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.id() == s)
            .ok_or_else(|| ClassifyError::UnknownStage(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Moderate,
    Elevated,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::Elevated => "Elevated",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        };
        f.write_str(s)
    }
}

/// Descriptive metadata rendered next to a classification.
#[derive(Debug)]
pub struct StageInfo {
    pub stage: Stage,
    pub label: &'static str,
    pub risk: RiskLevel,
    pub description: &'static str,
    pub action: &'static str,
}

pub static CATALOGUE: [StageInfo; 5] = [
    StageInfo {
        stage: Stage::NoDr,
        label: "No Diabetic Retinopathy",
        risk: RiskLevel::Low,
        description: "No clinical signs of retinopathy detected in the retina.",
        action: "Annual routine screening recommended.",
    },
    StageInfo {
        stage: Stage::Mild,
        label: "Mild NPDR",
        risk: RiskLevel::Moderate,
        description: "Microaneurysms only. Small areas of swelling in blood vessels.",
        action: "Monitor blood sugar and regular check-ups.",
    },
    StageInfo {
        stage: Stage::Moderate,
        label: "Moderate NPDR",
        risk: RiskLevel::Elevated,
        description: "Blood vessels that nourish the retina may swell and distort.",
        action: "Consult an ophthalmologist within 3-6 months.",
    },
    StageInfo {
        stage: Stage::Severe,
        label: "Severe NPDR",
        risk: RiskLevel::High,
        description: "Many blood vessels are blocked, depriving retina of blood supply.",
        action: "Immediate specialist consultation required.",
    },
    StageInfo {
        stage: Stage::ProliferativeDr,
        label: "Proliferative DR",
        risk: RiskLevel::Critical,
        description: "Advanced stage where new, fragile blood vessels grow in the retina.",
        action: "Urgent medical intervention to prevent vision loss.",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_wire_identifier() {
        for stage in Stage::ALL {
            assert_eq!(stage.id().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        let err = "Glaucoma".parse::<Stage>().unwrap_err();
        assert!(err.to_string().contains("Glaucoma"));
    }

    #[test]
    fn catalogue_is_indexed_by_stage() {
        for stage in Stage::ALL {
            assert_eq!(stage.info().stage, stage);
        }
        assert_eq!(Stage::Severe.info().label, "Severe NPDR");
        assert_eq!(Stage::ProliferativeDr.info().risk, RiskLevel::Critical);
    }

    #[test]
    fn serde_uses_wire_identifiers() {
        let json = serde_json::to_string(&Stage::ProliferativeDr).unwrap();
        assert_eq!(json, "\"Proliferative_DR\"");
        let stage: Stage = serde_json::from_str("\"No_DR\"").unwrap();
        assert_eq!(stage, Stage::NoDr);
    }
}

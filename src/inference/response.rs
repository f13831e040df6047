//! Classifier response parsing.
//!
//! The service answers `{ "prediction": "<stage id>", "confidence": <0..100> }`.

use serde::Deserialize;

use super::Classification;
use crate::error::ClassifyError;
use crate::stage::Stage;

#[derive(Debug, Deserialize)]
struct PredictionBody {
    prediction: String,
    confidence: f64,
}

/// Parse a response body into a normalized classification.
///
/// Returns an error if:
/// - The JSON is malformed or a field is missing
/// - `prediction` is not one of the five stage identifiers
/// - `confidence` is not a finite number
pub fn parse_prediction(body: &[u8]) -> Result<Classification, ClassifyError> {
    let parsed: PredictionBody = serde_json::from_slice(body)
        .map_err(|e| ClassifyError::InvalidResponse(e.to_string()))?;
    let stage: Stage = parsed.prediction.parse()?;
    let confidence = normalize_confidence(parsed.confidence)?;
    Ok(Classification { stage, confidence })
}

/// Convert a 0-100 percentage into the internal 0-1 scale.
///
/// Values outside 0-100 are clamped with a warning.
pub fn normalize_confidence(percent: f64) -> Result<f32, ClassifyError> {
    if !percent.is_finite() {
        return Err(ClassifyError::InvalidResponse(format!(
            "confidence is not finite: {}",
            percent
        )));
    }
    if !(0.0..=100.0).contains(&percent) {
        log::warn!(
            "classifier confidence {} outside 0-100; clamping",
            percent
        );
    }
    Ok((percent.clamp(0.0, 100.0) / 100.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_severe_prediction() {
        let c = parse_prediction(br#"{"prediction":"Severe","confidence":87.5}"#).unwrap();
        assert_eq!(c.stage, Stage::Severe);
        assert!((c.confidence - 0.875).abs() < 1e-6);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let c = parse_prediction(
            br#"{"prediction":"No_DR","confidence":99,"model":"effnet-b3"}"#,
        )
        .unwrap();
        assert_eq!(c.stage, Stage::NoDr);
        assert!((c.confidence - 0.99).abs() < 1e-6);
    }

    #[test]
    fn confidence_normalization_covers_the_scale() {
        for step in 0..=200 {
            let c = step as f64 * 0.5;
            let normalized = normalize_confidence(c).unwrap();
            assert!((0.0..=1.0).contains(&normalized));
            assert!((normalized as f64 - c / 100.0).abs() < 1e-6, "c = {}", c);
        }
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        assert_eq!(normalize_confidence(140.0).unwrap(), 1.0);
        assert_eq!(normalize_confidence(-3.0).unwrap(), 0.0);
        assert!(normalize_confidence(f64::NAN).is_err());
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = parse_prediction(br#"{"prediction":"Cataract","confidence":50}"#).unwrap_err();
        assert!(matches!(err, ClassifyError::UnknownStage(ref s) if s == "Cataract"));
    }

    #[test]
    fn malformed_body_is_rejected() {
        let err = parse_prediction(b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidResponse(_)));
        let err = parse_prediction(br#"{"prediction":"Mild"}"#).unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidResponse(_)));
    }
}

// Configuration record and signature tests

use super::*;

#[test]
fn test_defaults_are_valid() {
    assert!(PreprocessConfig::default().validate().is_ok());
    let engine = EngineConfig::default();
    assert!(engine.use_optical_flow);
    assert_eq!(engine.detection_interval, 5);
    assert_eq!(engine.max_features, 500);
}

#[test]
fn test_even_blur_kernel_rejected() {
    let cfg = PreprocessConfig {
        blur: true,
        blur_kernel: 4,
        ..Default::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_tiny_blur_kernel_rejected() {
    let cfg = PreprocessConfig {
        blur: true,
        blur_kernel: 1,
        ..Default::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_blur_kernel_ignored_when_blur_off() {
    let cfg = PreprocessConfig {
        blur: false,
        blur_kernel: 4,
        ..Default::default()
    };
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_signature_stable_across_calls() {
    let cfg = BuildConfig::default();
    assert_eq!(config_signature(&cfg), config_signature(&cfg));
}

#[test]
fn test_signature_changes_with_detector_threshold() {
    let base = BuildConfig::default();
    let mut changed = base.clone();
    changed.detector.fast_threshold += 1;
    assert_ne!(config_signature(&base), config_signature(&changed));
}

#[test]
fn test_signature_changes_with_weighting() {
    let base = BuildConfig::default();
    let changed = BuildConfig {
        weighting: WeightScheme::TfIdf,
        ..base.clone()
    };
    assert_ne!(config_signature(&base), config_signature(&changed));
}

#[test]
fn test_signature_changes_with_preprocessing() {
    let base = BuildConfig::default();
    let mut changed = base.clone();
    changed.preprocess.blur = false;
    assert_ne!(config_signature(&base), config_signature(&changed));
}

#[test]
fn test_unknown_keys_rejected() {
    let json = r#"{ "ratio": 0.7, "min_inliers": 10, "ransac_threshold": 3.0,
                    "ransac_iterations": 2000, "bogus": 1 }"#;
    let parsed: std::result::Result<MatchConfig, _> = serde_json::from_str(json);
    assert!(parsed.is_err());
}

#[test]
fn test_weight_scheme_serde_names() {
    assert_eq!(serde_json::to_string(&WeightScheme::Bm25).unwrap(), "\"bm25\"");
    assert_eq!(
        serde_json::to_string(&WeightScheme::TfIdf).unwrap(),
        "\"tf_idf\""
    );
}

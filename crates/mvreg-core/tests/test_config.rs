use mvreg_core::consts::{DEFAULT_MASK_THRESHOLD, NATIVE_SCALE};
use mvreg_core::registration::config::{MetricKind, MetricName, RegistrationConfig};
use mvreg_core::registration::{JobState, StopCondition};
use mvreg_core::{ImageType, MvregError, ViewKey};

// ---------------------------------------------------------------------------
// MetricKind
// ---------------------------------------------------------------------------

#[test]
fn test_metric_display() {
    assert_eq!(format!("{}", MetricKind::MutualInformation), "Mutual Information");
    assert_eq!(format!("{}", MetricKind::Correlation), "Correlation");
    assert_eq!(format!("{}", MetricKind::MeanSquares), "Mean Squares");
}

#[test]
fn test_metric_names_parse() {
    assert_eq!("mattes".parse::<MetricKind>().unwrap(), MetricKind::MutualInformation);
    assert_eq!("correlation".parse::<MetricKind>().unwrap(), MetricKind::Correlation);
    assert_eq!(
        "mean-squared-difference".parse::<MetricKind>().unwrap(),
        MetricKind::MeanSquares
    );
    assert!(matches!(
        "viola-wells".parse::<MetricKind>(),
        Err(MvregError::UnknownMetric(name)) if name == "viola-wells"
    ));
}

#[test]
fn test_metric_default_is_mean_squares() {
    assert_eq!(MetricKind::default(), MetricKind::MeanSquares);
    assert_eq!(MetricName::default().resolve().unwrap(), MetricKind::MeanSquares);
}

// ---------------------------------------------------------------------------
// RegistrationConfig
// ---------------------------------------------------------------------------

#[test]
fn test_defaults() {
    let cfg = RegistrationConfig::default();
    assert_eq!(cfg.scale, NATIVE_SCALE);
    assert_eq!(cfg.channel, 0);
    assert_eq!(cfg.rot_axis, 0);
    assert_eq!(cfg.mask_threshold, DEFAULT_MASK_THRESHOLD);
    assert!(cfg.skip_existing);
    assert!(cfg.write_results);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_toml_round_trip() {
    let mut cfg = RegistrationConfig::default();
    cfg.metric = MetricKind::MutualInformation.into();
    cfg.offset = [0.0, 2.5, -1.0];
    cfg.optimizer.max_iterations = 40;

    let text = toml::to_string(&cfg).unwrap();
    assert!(text.contains("metric = \"mattes\""), "got: {text}");
    let back: RegistrationConfig = toml::from_str(&text).unwrap();
    assert_eq!(back.metric.resolve().unwrap(), MetricKind::MutualInformation);
    assert_eq!(back.offset, [0.0, 2.5, -1.0]);
    assert_eq!(back.optimizer.max_iterations, 40);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let cfg: RegistrationConfig = toml::from_str(
        "rot_axis = 2\nmetric = \"correlation\"\n\n[sampling]\nfraction = 0.5\n",
    )
    .unwrap();
    assert_eq!(cfg.rot_axis, 2);
    assert_eq!(cfg.metric.resolve().unwrap(), MetricKind::Correlation);
    assert_eq!(cfg.sampling.fraction, 0.5);
    assert_eq!(cfg.histogram_bins, RegistrationConfig::default().histogram_bins);
}

#[test]
fn test_json_round_trip() {
    let cfg = RegistrationConfig {
        channel: 1,
        scale: 50,
        ..Default::default()
    };
    let json = serde_json::to_string(&cfg).unwrap();
    let back: RegistrationConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.channel, 1);
    assert_eq!(back.scale, 50);
}

#[test]
fn test_unknown_metric_survives_parsing() {
    let cfg: RegistrationConfig = toml::from_str("metric = \"demons\"\n").unwrap();
    assert!(matches!(cfg.metric.resolve(), Err(MvregError::UnknownMetric(_))));
}

#[test]
fn test_validate_rejects_bad_values() {
    let bad_axis = RegistrationConfig {
        rot_axis: 3,
        ..Default::default()
    };
    assert!(matches!(bad_axis.validate(), Err(MvregError::InvalidConfig(_))));

    let mut bad_fraction = RegistrationConfig::default();
    bad_fraction.sampling.fraction = 0.0;
    assert!(bad_fraction.validate().is_err());

    let mut bad_relaxation = RegistrationConfig::default();
    bad_relaxation.optimizer.relaxation_factor = 1.0;
    assert!(bad_relaxation.validate().is_err());

    let bad_offset = RegistrationConfig {
        offset: [f64::NAN, 0.0, 0.0],
        ..Default::default()
    };
    assert!(bad_offset.validate().is_err());
}

// ---------------------------------------------------------------------------
// Display of keys and states
// ---------------------------------------------------------------------------

#[test]
fn test_view_key_display() {
    let key = ViewKey::new(ImageType::Registered, 50, 3, 1);
    assert_eq!(key.to_string(), "registered/scale_50/index_3/channel_1");
    assert_eq!("psf".parse::<ImageType>().unwrap(), ImageType::Psf);
}

#[test]
fn test_state_display() {
    assert_eq!(JobState::Optimizing.to_string(), "Optimizing");
    assert_eq!(StopCondition::MinStepLength.to_string(), "step length below minimum");
}

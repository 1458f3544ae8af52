use attack::{AttackConfig, BarrierKind, ConfigError, GtData, LossSpec};

#[test]
fn defaults_fill_everything_but_dt() {
    let config = AttackConfig::from_json(r#"{"dt": 0.1}"#).unwrap();
    assert_eq!(config, AttackConfig::new(0.1));
    assert_eq!(config.num_samples_perturb, 20);
    assert_eq!(config.max_number_iterations, 50);
    assert_eq!(config.gt_data, GtData::No);
    assert_eq!(config.loss_function_1.to_string(), "ADE_Y_GT_Y_Pred_Max");
    assert!(config.loss_function_2.is_none());
}

#[test]
fn full_configuration_parses() {
    let text = r#"{
        "dt": 0.5,
        "num_samples_perturb": 3,
        "max_number_iterations": 10,
        "gamma": 0.9,
        "alpha": 0.02,
        "loss_function_1": "FDE_Y_Perturb_Y_Pred_Min",
        "loss_function_2": "Y_perturb",
        "barrier_function_past": "Time_Trajectory_specific",
        "barrier_function_future": "Trajectory_specific_V2",
        "distance_threshold_past": 2.0,
        "log_value_future": 2.5,
        "GT_data": "full",
        "batch_size": 8
    }"#;
    let config = AttackConfig::from_json(text).unwrap();
    assert_eq!(config.loss_function_2, Some(LossSpec::PerturbFuture));
    assert_eq!(config.barrier_function_past, Some(BarrierKind::TimeTrajectorySpecific));
    assert_eq!(config.barrier_function_future, Some(BarrierKind::TrajectorySpecific));
    assert_eq!(config.gt_data, GtData::Full);
    assert_eq!(config.batch_size, 8);
    assert!(config.future_included());
}

#[test]
fn missing_dt_is_rejected() {
    assert!(matches!(AttackConfig::from_json(r#"{"alpha": 0.1}"#), Err(ConfigError::Parse(_))));
}

#[test]
fn unknown_keys_are_rejected() {
    let err = AttackConfig::from_json(r#"{"dt": 0.1, "aplha": 0.1}"#).unwrap_err();
    assert!(err.to_string().contains("aplha"));
}

#[test]
fn unknown_names_are_rejected() {
    assert!(AttackConfig::from_json(r#"{"dt": 0.1, "loss_function_1": "ADE_Y_GT_Y_GT_Max"}"#).is_err());
    assert!(AttackConfig::from_json(r#"{"dt": 0.1, "barrier_function_past": "Space_specific"}"#).is_err());
    assert!(AttackConfig::from_json(r#"{"dt": 0.1, "GT_data": "some"}"#).is_err());
    assert!(matches!(
        "MSE_Y_GT_Y_Pred_Max".parse::<LossSpec>(),
        Err(ConfigError::UnknownObjective(_))
    ));
}

#[test]
fn invalid_values_name_their_field() {
    for (text, field) in [
        (r#"{"dt": 0.0}"#, "dt"),
        (r#"{"dt": 0.1, "log_value_past": 1.0}"#, "log_value_past"),
        (r#"{"dt": 0.1, "alpha": -1.0}"#, "alpha"),
        (r#"{"dt": 0.1, "num_samples_perturb": 0}"#, "num_samples_perturb"),
    ] {
        match AttackConfig::from_json(text) {
            Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(got, field),
            other => panic!("{text}: {other:?}"),
        }
    }
}

#[test]
fn method_names() {
    let mut config = AttackConfig::new(0.1);
    assert_eq!(
        config.method_name("constant_velocity"),
        "constant_velocity---control_action---1.0---0.01---20---50---ADE_Y_GT_Y_Pred_Max---no"
    );
    config.loss_function_2 = Some("Collision_Y_pred_tar_Y_GT_ego".parse().unwrap());
    config.barrier_function_past = Some(BarrierKind::TimeSpecific);
    config.gt_data = GtData::One;
    assert_eq!(
        config.method_name("mlp"),
        "mlp---control_action---1.0---0.01---20---50---ADE_Y_GT_Y_Pred_Max---one\
         ---Collision_Y_pred_tar_Y_GT_ego---Time_specific---1.0---1.5"
    );
}

#[test]
fn config_serialises_with_option_names() {
    let json = serde_json::to_value(AttackConfig::new(0.25)).unwrap();
    assert_eq!(json["GT_data"], "no");
    assert_eq!(json["loss_function_1"], "ADE_Y_GT_Y_Pred_Max");
    assert_eq!(json["dt"], 0.25);
}

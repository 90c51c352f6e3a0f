use cudaplug::PluginConfig;

// Environment values are cached on first read, so this binary holds a single test.
#[test]
fn environment_overrides_defaults() {
    std::env::set_var("CUDAPLUG_DEVICE_ID", "3");
    std::env::set_var("CUDAPLUG_OPERATION_BENCHMARK", "on");

    let config = PluginConfig::from_env();
    assert_eq!(config.device_id, 3);
    assert!(config.operation_benchmark);
    assert!(config.creation_context().optimize());
}

//! `ConnectorContext` 组装与观测安装的契约测试。

use std::{sync::Arc, time::Duration};

use spark_connector::{
    ConnectorConfig, ConnectorContext, ConnectorError, SocketOption,
    observability::{self, InstallError},
    testing::{CountingWait, RecordingPermissions, ScriptedNetwork, Verdict},
};

#[test]
fn builder_applies_config_and_defaults() {
    let config = ConnectorConfig::default()
        .with_read_buffer_capacity(64)
        .with_read_timeout(Duration::from_millis(250));
    let ctx = ConnectorContext::builder(ScriptedNetwork::new().into_arc())
        .config(config.clone())
        .build()
        .expect("valid context");

    assert_eq!(ctx.config(), &config);
    assert!(ctx.permissions().check_connect("socket://anything:1").is_ok());

    let clone = ctx.clone();
    assert!(Arc::ptr_eq(clone.network(), ctx.network()));
}

#[test]
fn builder_rejects_invalid_config() {
    let err = ConnectorContext::builder(ScriptedNetwork::new().into_arc())
        .config(ConnectorConfig::default().with_listen_backlog(0))
        .build()
        .expect_err("backlog of zero");
    assert!(matches!(err, ConnectorError::InvalidArgument { .. }));
}

#[test]
fn injected_capabilities_are_used_verbatim() {
    let waiter = Arc::new(CountingWait::new());
    let permissions = Arc::new(RecordingPermissions::new(
        Verdict::Deny("offline mode"),
        Verdict::Allow,
    ));
    let ctx = ConnectorContext::builder(ScriptedNetwork::new().into_arc())
        .waiter(waiter.clone())
        .permissions(permissions.clone())
        .build()
        .expect("valid context");

    ctx.waiter().wait(0);
    assert_eq!(waiter.waits(), 1);

    let failure = ctx
        .permissions()
        .check_connect("ssl://bank.example:443")
        .expect_err("denied");
    let err = failure.into_error("ssl://bank.example:443");
    assert_eq!(err.code(), "spark.connector.security.denied");
    assert_eq!(permissions.connect_targets(), vec!["ssl://bank.example:443"]);
}

#[test]
fn option_codes_outside_the_fixed_space_are_rejected() {
    for code in [99, -1, 5] {
        assert!(matches!(
            SocketOption::from_code(code),
            Err(ConnectorError::InvalidArgument { .. })
        ));
    }
}

#[test]
fn observability_install_is_one_shot() {
    let first = observability::install();
    assert!(
        first.is_ok() || matches!(first, Err(InstallError::SubscriberAlreadySet)),
        "unexpected first install result: {first:?}"
    );
    let second = observability::install().expect_err("second install must fail");
    assert!(matches!(
        second,
        InstallError::AlreadyInstalled | InstallError::SubscriberAlreadySet
    ));
}

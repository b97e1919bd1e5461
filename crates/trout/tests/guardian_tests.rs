#![cfg(unix)]

use std::sync::Arc;
use trout::{
    ControlPanel, GuardianConfig, GuardianState, LaunchCommand, PanelConfig, PlatformManager,
    PlatformProcessManagerFactory, ProcessManagerFactory, SessionGuardian, TerminationConfig,
    TerminationResult, UnitConfig,
};

fn guardian(command: LaunchCommand) -> SessionGuardian<PlatformManager> {
    SessionGuardian::new(
        Arc::new(PlatformProcessManagerFactory::create_process_manager()),
        command,
        TerminationConfig::quick(),
    )
}

#[tokio::test]
async fn test_guardian_lifecycle() {
    let guardian = guardian(LaunchCommand::shell("sleep 30"));
    assert_eq!(guardian.state().await, GuardianState::Uninitialized);

    assert_eq!(guardian.start().await, GuardianState::Running);
    assert!(guardian.is_alive().await);
    assert!(guardian.pid().await.is_some());

    assert_eq!(guardian.shutdown().await, Some(TerminationResult::Success));
    assert_eq!(guardian.state().await, GuardianState::Stopped);
    assert!(!guardian.is_alive().await);

    // Second shutdown is a no-op
    assert_eq!(guardian.shutdown().await, None);
    assert_eq!(guardian.state().await, GuardianState::Stopped);
}

#[tokio::test]
async fn test_failed_guardian_goes_straight_to_stopped() {
    let guardian = guardian(LaunchCommand::exec(
        "/nonexistent/trout-missing-roscore",
        Vec::<String>::new(),
    ));

    assert_eq!(guardian.start().await, GuardianState::Stopped);
    assert!(!guardian.is_alive().await);
    assert_eq!(guardian.shutdown().await, None);
}

#[tokio::test]
async fn test_panel_session() {
    let config = PanelConfig {
        units: vec![
            UnitConfig::builder()
                .id("node")
                .command(LaunchCommand::shell("sleep 30"))
                .group("nodes")
                .build()
                .unwrap(),
            UnitConfig::builder()
                .id("app")
                .command(LaunchCommand::exec("sleep", ["30"]))
                .group("apps")
                .open_url("http://localhost:5173")
                .build()
                .unwrap(),
        ],
        guardian: GuardianConfig {
            enabled: true,
            command: LaunchCommand::exec("sleep", ["30"]),
        },
        termination: TerminationConfig::quick(),
        ..Default::default()
    };

    let panel = ControlPanel::boot(config).await.unwrap();
    let guardian = panel.guardian().unwrap();
    assert_eq!(guardian.state().await, GuardianState::Running);

    let supervisor = panel.supervisor();
    supervisor.start_group("nodes").await.unwrap();
    supervisor.start("app").await.unwrap();
    assert_eq!(supervisor.running_units().await.len(), 2);

    panel.shutdown().await;
    assert!(supervisor.running_units().await.is_empty());
    assert_eq!(guardian.state().await, GuardianState::Stopped);

    // Idempotent
    panel.shutdown().await;
    assert_eq!(guardian.state().await, GuardianState::Stopped);
}

//! Integration tests for graceful shutdown behavior.

use dacta::mock::{MockCommandModule, MockConfig};
use dacta::{Command, Dacta, LinkConfig, LinkStatus, Port};
use std::time::{Duration, Instant};

fn test_config() -> LinkConfig {
    LinkConfig {
        read_timeout_ms: 50,
        shutdown_flush_ms: 50,
        handshake_timeout_ms: Some(2000),
        ..LinkConfig::default()
    }
}

/// The device records bytes on its own task, so give it a moment to catch up.
async fn wait_for_kill_all(device: &MockCommandModule) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !device.kill_all_seen() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("kill-all never reached the device");
}

#[tokio::test]
async fn test_close_stops_all_outputs() {
    let (transport, device) = MockCommandModule::pair(MockConfig::default());
    let link = Dacta::connect(transport, &test_config()).await.unwrap();

    link.send_port_cmd(Command::PortOnRight, Port::H.into());
    link.set_power(Port::H.into(), 7);
    link.close().await.unwrap();

    wait_for_kill_all(&device).await;
    assert_eq!(device.commands().last(), Some(&Command::KillAll.byte()));
}

#[tokio::test]
async fn test_nothing_written_after_close() {
    let (transport, device) = MockCommandModule::pair(MockConfig::default());
    let link = Dacta::connect(transport, &test_config()).await.unwrap();
    let handle = link.handle();
    link.close().await.unwrap();

    let written = device.received().len();
    handle.send_port_cmd(Command::PortOnSame, 0);
    handle.set_power(0, 3);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(device.received().len(), written);
    assert_eq!(handle.link_status(), LinkStatus::Stopped);
}

#[tokio::test]
async fn test_shutdown_timeout() {
    // An idle link must not wait for another queue item or a full read timeout
    // before it can stop.
    let (transport, _device) = MockCommandModule::pair(MockConfig::default());
    let config = LinkConfig {
        read_timeout_ms: 2000,
        ..test_config()
    };
    let link = Dacta::connect(transport, &config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    link.close().await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_secs(1),
        "Shutdown took too long: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_shutdown_detached() {
    let link = Dacta::detached(&test_config());
    link.send_port_cmd(Command::Reverse, Port::A.into());
    link.close().await.unwrap();
}

#[tokio::test]
async fn test_independent_links_shut_down_independently() {
    let (first_transport, first_device) = MockCommandModule::pair(MockConfig::default());
    let (second_transport, second_device) = MockCommandModule::pair(MockConfig::default());
    let first = Dacta::connect(first_transport, &test_config()).await.unwrap();
    let second = Dacta::connect(second_transport, &test_config()).await.unwrap();

    first.close().await.unwrap();

    second.send_port_cmd(Command::PortOnLeft, Port::B.into());
    assert!(
        second_device
            .wait_for_commands(1, Duration::from_secs(2))
            .await
    );
    assert_eq!(second.link_status(), LinkStatus::Running);
    wait_for_kill_all(&first_device).await;
    assert!(!second_device.kill_all_seen());

    second.close().await.unwrap();
}

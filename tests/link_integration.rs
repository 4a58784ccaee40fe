//! End-to-end tests against the simulated command module.

use dacta::mock::{MockCommandModule, MockConfig};
use dacta::{Command, Dacta, DactaError, DactaHandle, LinkConfig, Port};
use std::time::Duration;

fn fast_config() -> LinkConfig {
    LinkConfig {
        read_timeout_ms: 20,
        shutdown_flush_ms: 20,
        handshake_timeout_ms: Some(2000),
        ..LinkConfig::default()
    }
}

fn fast_device() -> MockConfig {
    MockConfig {
        frame_period: Duration::from_millis(5),
        ..MockConfig::default()
    }
}

/// Poll until `cond` holds or two seconds pass.
async fn eventually<F>(link: &DactaHandle, cond: F)
where
    F: Fn(&DactaHandle) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond(link) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until every frame the device has built so far has been applied.
async fn drain_frames(link: &DactaHandle, device: &MockCommandModule) {
    let target = device.frames_sent() + 2;
    eventually(link, |l| l.stats().sync.frames_accepted >= target).await;
}

#[tokio::test]
async fn test_sensor_readings_flow_after_noisy_handshake() {
    let (transport, device) = MockCommandModule::pair(MockConfig {
        noise_before_confirmation: b"\x00\xff###Just a bit".to_vec(),
        ..fast_device()
    });
    device.set_channel(Port::A, 200, 0x01);
    device.set_channel(Port::B, 540, 0x00);
    device.set_channel(Port::C, 1000, 0x00);

    let link = Dacta::connect(transport, &fast_config()).await.unwrap();
    eventually(&link, |l| l.value(Port::A.into()) == 200).await;

    assert!(link.is_pressed(Port::A.into()));
    assert_eq!(link.status(Port::A.into()), 0x01);
    assert!(!link.is_pressed(Port::C.into()));
    // (760 - 540) / 4.4 = 50 degrees above freezing.
    assert!((link.temp_f(Port::B.into()) - 82.0).abs() < 1e-9);
    assert!((link.temp_c(Port::B.into()) - 27.777_777_777_777_78).abs() < 1e-9);

    link.close().await.unwrap();
}

#[tokio::test]
async fn test_garbage_between_frames_is_skipped() {
    let (transport, device) = MockCommandModule::pair(MockConfig {
        noise_between_frames: vec![0x5A, 0x00, 0xC3],
        noise_interval: 1,
        ..fast_device()
    });
    device.set_channel(Port::D, 1023, 0x3F);

    let link = Dacta::connect(transport, &fast_config()).await.unwrap();
    eventually(&link, |l| l.stats().sync.frames_accepted >= 10).await;

    let snapshot = link.snapshot();
    assert_eq!(snapshot.value(Port::D.into()), 1023);
    assert_eq!(snapshot.status(Port::D.into()), 0x3F);
    assert!(link.stats().sync.windows_rejected > 0);

    link.close().await.unwrap();
}

#[tokio::test]
async fn test_rotation_accumulates_on_rotational_ports_only() {
    let (transport, device) = MockCommandModule::pair(fast_device());
    device.set_channel(Port::A, 300, 0);
    device.set_rotation_step(Port::A, 3);
    device.set_channel(Port::F, 300, 0);
    device.set_rotation_step(Port::F, -2);

    let link = Dacta::connect(transport, &fast_config()).await.unwrap();
    eventually(&link, |l| l.rotation(Port::F.into()) <= -20).await;
    assert_eq!(link.rotation(Port::A.into()), 0);
    assert_eq!(link.rotation(Port::F.into()) % 2, 0);

    device.set_rotation_step(Port::F, 0);
    drain_frames(&link, &device).await;

    link.clear_rotation(Port::F.into());
    drain_frames(&link, &device).await;
    assert_eq!(link.rotation(Port::F.into()), 0);

    link.close().await.unwrap();
}

#[tokio::test]
async fn test_clear_rotation_leaves_other_ports() {
    let (transport, device) = MockCommandModule::pair(fast_device());
    device.set_rotation_step(Port::E, 1);
    device.set_rotation_step(Port::G, 1);

    let link = Dacta::connect(transport, &fast_config()).await.unwrap();
    eventually(&link, |l| l.rotation(Port::G.into()) >= 5).await;
    device.set_rotation_step(Port::E, 0);
    device.set_rotation_step(Port::G, 0);
    drain_frames(&link, &device).await;

    let g_before = link.rotation(Port::G.into());
    link.clear_rotation(Port::E.into());
    assert_eq!(link.rotation(Port::E.into()), 0);
    assert_eq!(link.rotation(Port::G.into()), g_before);

    link.close().await.unwrap();
}

#[tokio::test]
async fn test_commands_arrive_in_order() {
    let (transport, device) = MockCommandModule::pair(fast_device());
    let link = Dacta::connect(transport, &fast_config()).await.unwrap();

    link.send_port_cmd(Command::PortOnLeft, Port::B.into());
    link.set_power(Port::B.into(), 5);
    link.send_port_cmd(Command::DriveRight, 9);
    link.send_port_cmd(Command::PortOff, Port::B.into());

    assert!(device.wait_for_commands(5, Duration::from_secs(2)).await);
    assert_eq!(device.commands(), vec![0x11, 0xB5, 0x02, 0x49, 0x31]);

    link.close().await.unwrap();
}

#[tokio::test]
async fn test_producers_on_many_tasks_never_split_power_pairs() {
    let (transport, device) = MockCommandModule::pair(fast_device());
    let link = Dacta::connect(transport, &fast_config()).await.unwrap();

    let mut producers = Vec::new();
    for port in 0..8u8 {
        let handle = link.handle();
        producers.push(tokio::spawn(async move {
            for level in 0..8u8 {
                handle.set_power(port, level);
                handle.send_port_cmd(Command::Reverse, port);
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    assert!(device.wait_for_commands(8 * 8 * 3, Duration::from_secs(2)).await);
    let bytes = device.commands();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] & 0xF8 == 0xB0 {
            assert!(bytes[i + 1].is_power_of_two(), "power byte not followed by mask");
            i += 2;
        } else {
            // Reverse, or a keepalive no-op on a slow machine.
            let op = bytes[i] & 0xF8;
            assert!(op == Command::Reverse.byte() || bytes[i] == Command::Nop.byte());
            i += 1;
        }
    }

    link.close().await.unwrap();
}

#[tokio::test]
async fn test_keepalive_reaches_device() {
    let (transport, device) = MockCommandModule::pair(fast_device());
    let config = LinkConfig {
        keepalive_interval_ms: 30,
        ..fast_config()
    };
    let link = Dacta::connect(transport, &config).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let nops = device
        .commands()
        .iter()
        .filter(|&&b| b == Command::Nop.byte())
        .count();
    assert!(nops >= 3, "expected several keepalives, saw {}", nops);
    assert!(link.stats().keepalives_sent >= 3);

    link.close().await.unwrap();
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let (transport, _device) = MockCommandModule::pair(MockConfig {
        answer_challenge: false,
        ..fast_device()
    });
    let config = LinkConfig {
        handshake_timeout_ms: Some(200),
        ..fast_config()
    };

    let err = Dacta::connect(transport, &config).await.err().unwrap();
    assert!(matches!(err, DactaError::HandshakeTimeout(_)));
}

#[tokio::test]
async fn test_unplugged_device_surfaces_fault() {
    let (transport, device) = MockCommandModule::pair(fast_device());
    let link = Dacta::connect(transport, &fast_config()).await.unwrap();
    eventually(&link, |l| l.stats().sync.frames_accepted > 0).await;

    device.unplug();
    let status = tokio::time::timeout(Duration::from_secs(2), link.wait_faulted())
        .await
        .unwrap();
    assert!(status.is_faulted());

    assert!(matches!(
        link.close().await,
        Err(DactaError::ShutdownFailed(_))
    ));
}

#[tokio::test]
async fn test_scoped_session_on_missing_port_runs_detached() {
    let config = LinkConfig {
        port: "/dev/no-such-dacta".into(),
        ..fast_config()
    };

    let value = Dacta::scoped(&config, |link| async move {
        link.send_port_cmd(Command::PortOnSame, Port::C.into());
        link.set_power(Port::C.into(), 4);
        assert_eq!(link.link_status(), dacta::LinkStatus::Detached);
        Ok(link.value(Port::C.into()))
    })
    .await
    .unwrap();

    assert_eq!(value, 0);
}

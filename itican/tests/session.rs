mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use itican_core::{Capability, CanMessage, ChannelConfig, OpenMode, OpenType, Phase, SettingsScope, TxMode};
use itican_core::error::{CanError, CODE_CHANNEL_BUSY, CODE_INVALID_CHANNEL_STATE, CODE_INVALID_TIMING};
use itican_core::timing::{ArbitrationTiming, DataTiming};
use itican_rs::{ChannelState, ItiCan};
use common::{frames, MockController, NATIVE_FAILURE, NATIVE_TIMEOUT};

fn open_session(mock: MockController) -> anyhow::Result<(ItiCan<MockController>, itican_rs::ChannelSession<MockController>)> {
    let hub = ItiCan::new(mock);
    let session = hub.get_channel("CAN0")?;
    session.open(OpenType::FD_CAN_BRS, OpenMode::Normal)?;
    Ok((hub, session))
}

#[test]
fn lifecycle() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0", "CAN1"]));
    assert_eq!(hub.find_all_channels()?, vec!["CAN0", "CAN1"]);

    let session = hub.session();
    assert_eq!(session.state(), ChannelState::Unbound);
    session.discover("CAN1")?;
    assert_eq!(session.state(), ChannelState::Discovered);
    assert_eq!(session.name().as_deref(), Some("CAN1"));

    session.open(OpenType::Classic_CAN, OpenMode::Normal)?;
    assert_eq!(session.state(), ChannelState::Open);
    assert_eq!(session.open_type(), Some(OpenType::Classic_CAN));

    session.close()?;
    assert_eq!(session.state(), ChannelState::Closed);
    assert!(hub.bound_channels().is_empty());

    // closed is terminal
    assert!(matches!(session.close(), Err(CanError::InvalidChannelState { .. })));
    assert!(matches!(session.open(OpenType::Classic_CAN, OpenMode::Normal), Err(CanError::InvalidChannelState { .. })));
    assert_eq!(session.last_error_code(), CODE_INVALID_CHANNEL_STATE);
    Ok(())
}

#[test]
fn unknown_channel_is_not_found() {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    assert!(matches!(hub.get_channel("CAN9"), Err(CanError::ChannelNotFound(_))));
    assert!(hub.bound_channels().is_empty());
}

#[test]
fn channel_is_bound_once() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    let first = hub.get_channel("CAN0")?;

    let second = hub.session();
    assert!(matches!(second.discover("CAN0"), Err(CanError::ChannelBusy(_))));
    assert_eq!(second.last_error_code(), CODE_CHANNEL_BUSY);
    assert_eq!(second.state(), ChannelState::Unbound);

    drop(first);
    second.discover("CAN0")?;
    assert_eq!(hub.bound_channels(), vec!["CAN0"]);
    Ok(())
}

#[test]
fn dropping_an_open_session_keeps_the_channel_held() -> anyhow::Result<()> {
    let (hub, session) = open_session(MockController::new(["CAN0"]))?;
    let calls = hub.controller().calls();
    drop(session);

    // no implicit close
    assert_eq!(hub.controller().calls(), calls);
    assert_eq!(hub.bound_channels(), vec!["CAN0"]);
    assert_eq!(hub.abandoned_channels(), vec!["CAN0"]);

    let again = hub.session();
    assert!(matches!(again.discover("CAN0"), Err(CanError::ChannelBusy(_))));
    assert_eq!(again.last_error_code(), CODE_CHANNEL_BUSY);
    assert_eq!(again.state(), ChannelState::Unbound);

    hub.close_abandoned("CAN0")?;
    assert!(hub.bound_channels().is_empty());
    assert!(hub.abandoned_channels().is_empty());
    assert!(matches!(hub.close_abandoned("CAN0"), Err(CanError::InvalidChannelState { .. })));

    again.discover("CAN0")?;
    again.open(OpenType::Classic_CAN, OpenMode::Normal)?;
    assert!(matches!(hub.close_abandoned("CAN0"), Err(CanError::ChannelBusy(_))));
    again.close()?;
    Ok(())
}

#[test]
fn dropping_a_discovered_session_releases_the_name() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    drop(hub.get_channel("CAN0")?);

    assert!(hub.bound_channels().is_empty());
    assert!(hub.abandoned_channels().is_empty());
    hub.get_channel("CAN0")?;
    Ok(())
}

#[test]
fn unsupported_modes_never_reach_the_controller() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    let session = hub.get_channel("CAN0")?;
    let calls = hub.controller().calls();

    for mode in [OpenMode::Listen, OpenMode::Loopback] {
        assert!(matches!(session.open(OpenType::FD_CAN, mode), Err(CanError::UnsupportedMode(_))));
    }
    assert!(matches!(
        session.open(OpenType::FD_CAN_NO_ISO, OpenMode::Normal),
        Err(CanError::UnsupportedFeature(_))
    ));

    assert_eq!(hub.controller().calls(), calls);
    assert_eq!(session.state(), ChannelState::Discovered);
    Ok(())
}

#[test]
fn frame_ops_require_an_open_channel() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0"]).with_inbox(frames(2)));
    let session = hub.get_channel("CAN0")?;
    let frame = CanMessage::new(0x123, &[1, 2, 3]).unwrap();

    let check = |session: &itican_rs::ChannelSession<MockController>| {
        let calls = hub.controller().calls();
        assert!(matches!(session.send_frame(&frame, None), Err(CanError::InvalidChannelState { .. })));
        let (count, result) = session.send_frames(&[frame.clone()], None);
        assert_eq!(count, 0);
        assert!(matches!(result, Err(CanError::InvalidChannelState { .. })));
        assert!(matches!(session.receive_frame(Some(0)), Err(CanError::InvalidChannelState { .. })));
        let (received, result) = session.receive_frames(3, Some(0));
        assert!(received.is_empty());
        assert!(matches!(result, Err(CanError::InvalidChannelState { .. })));
        assert!(matches!(session.pending_frames(), Err(CanError::InvalidChannelState { .. })));
        assert_eq!(hub.controller().calls(), calls);
    };

    check(&session);
    session.open(OpenType::Classic_CAN, OpenMode::Normal)?;
    session.close()?;
    check(&session);

    assert_eq!(hub.controller().transmits(), 0);
    assert_eq!(hub.controller().receives(), 0);
    Ok(())
}

#[test]
fn send_frames_stops_at_first_failure() -> anyhow::Result<()> {
    let mock = MockController {
        fail_transmit_at: Some(2),
        ..MockController::new(["CAN0"])
    };
    let (hub, session) = open_session(mock)?;

    let (count, result) = session.send_frames(&frames(3), Some(100));
    assert_eq!(count, 1);
    assert!(matches!(result, Err(CanError::IoFailure { code: NATIVE_FAILURE, .. })));
    assert_eq!(hub.controller().transmits(), 2);
    assert_eq!(hub.controller().sent.lock().unwrap().len(), 1);
    assert_eq!(session.last_error_code(), NATIVE_FAILURE);
    assert_eq!(hub.error_text(session.last_error_code()), "bus off");
    Ok(())
}

#[test]
fn receive_frames_keeps_partial_result_on_timeout() -> anyhow::Result<()> {
    let expected = frames(5);
    let mock = MockController {
        timeout_receive_at: Some(3),
        ..MockController::new(["CAN0"]).with_inbox(expected.clone())
    };
    let (hub, session) = open_session(mock)?;

    let (received, result) = session.receive_frames(5, Some(10));
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], expected[0]);
    assert_eq!(received[1], expected[1]);
    assert!(received.iter().all(|f| f.timestamp() > 0 && f.channel() == "CAN0"));
    assert!(result.is_err_and(|e| e.is_timeout() && e.code() == NATIVE_TIMEOUT));
    assert_eq!(hub.controller().receives(), 3);

    // a timeout leaves the channel usable
    assert_eq!(session.state(), ChannelState::Open);
    assert_eq!(session.receive_frame(Some(0))?, expected[2]);
    Ok(())
}

#[test]
fn fd_frame_on_classic_channel_is_rejected() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    let session = hub.get_channel("CAN0")?;
    session.open(OpenType::Classic_CAN, OpenMode::Normal)?;

    let fd = CanMessage::new_fd(0x18DA_F110u32, &[0; 16], true).unwrap();
    assert!(matches!(session.send_frame(&fd, None), Err(CanError::UnsupportedFeature(_))));
    assert_eq!(hub.controller().transmits(), 0);
    Ok(())
}

#[test]
fn timing_is_staged_until_applied() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    let session = hub.get_channel("CAN0")?;
    let calls = hub.controller().calls();

    session.set_custom_baud_rate(&ArbitrationTiming::new(4, 34, 5, 4))?;
    session.set_custom_fd_baud_rate(&DataTiming::new(2, 15, 4, 4, 16))?;
    assert!(matches!(
        session.set_custom_baud_rate(&ArbitrationTiming::new(4, 300, 5, 4)),
        Err(CanError::InvalidTimingParameter(_))
    ));
    assert!(matches!(session.set_baud_rate(0), Err(CanError::InvalidTimingParameter(_))));
    // staging does no I/O
    assert_eq!(hub.controller().calls(), calls);
    assert!(hub.controller().registers.lock().unwrap().is_empty());

    session.apply_settings(SettingsScope::Persistent)?;
    session.apply_settings(SettingsScope::Persistent)?;
    let applied = hub.controller().applied.lock().unwrap().clone();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], applied[1]);
    assert_eq!(applied[0].0, SettingsScope::Persistent);
    assert_eq!(applied[0].1.get(&Phase::Arbitration), Some(&0x32_A004_2104));

    assert_eq!(session.baud_rate()?, 0x32_A004_2104);
    let decoded = session.decoded_timing(Phase::Data)?;
    assert_eq!(decoded.tdc_offset(), Some(16));
    assert_eq!(decoded.bitrate(), 2_000_000);
    assert!(session.custom_baud_rate()?.starts_with("32A0042104,"));
    Ok(())
}

#[test]
fn raw_baud_rate_accepts_nominal_rates() -> anyhow::Result<()> {
    let (hub, session) = open_session(MockController::new(["CAN0"]))?;
    session.set_baud_rate(500_000)?;
    session.set_fd_baud_rate(2_000_000)?;
    assert_eq!(session.staged_timing(), (Some(500_000), Some(2_000_000)));

    session.apply_settings(SettingsScope::Temporary)?;
    assert_eq!(session.fd_baud_rate()?, 2_000_000);
    assert_eq!(hub.controller().applied.lock().unwrap()[0].0, SettingsScope::Temporary);

    // a nominal rate has no fields to decode
    let calls = hub.controller().calls();
    assert!(matches!(session.decoded_timing(Phase::Arbitration), Err(CanError::InvalidTimingParameter(_))));
    assert_eq!(session.last_error_code(), CODE_INVALID_TIMING);
    assert_eq!(hub.controller().calls(), calls + 1);
    Ok(())
}

#[test]
fn init_with_configuration() -> anyhow::Result<()> {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    let mut cfg = ChannelConfig::new(OpenType::FD_CAN);
    cfg.set_arbitration(ArbitrationTiming::new(4, 34, 5, 4));

    let session = hub.open_configured("CAN0", &cfg)?;
    assert_eq!(session.state(), ChannelState::Open);
    assert_eq!(hub.controller().applied.lock().unwrap().len(), 1);
    Ok(())
}

#[test]
fn capability_probes() -> anyhow::Result<()> {
    let mock = MockController {
        capabilities: HashSet::from([Capability::EchoMessage, Capability::TxMode(TxMode::Normal)]),
        ..MockController::new(["CAN0"])
    };
    let (hub, session) = open_session(mock)?;

    assert!(session.is_echo_supported()?);
    assert!(!session.is_termination_supported()?);
    assert!(!session.is_blink_supported()?);
    assert!(session.is_tx_mode_supported(TxMode::Normal)?);
    assert!(!session.is_tx_mode_supported(TxMode::QUEUE_SEND)?);

    session.set_echo_message(true)?;
    assert!(session.is_echo_enabled()?);

    // absent features degrade to a no-op
    session.set_termination(true)?;
    session.set_channel_blink(true)?;
    session.set_bus_error_report(true)?;
    assert!(!session.is_termination_enabled()?);
    assert!(!session.is_channel_blinking()?);
    let enabled = hub.controller().enabled.lock().unwrap().clone();
    assert_eq!(enabled, HashSet::from([Capability::EchoMessage]));
    assert_eq!(session.last_error_code(), 0);
    Ok(())
}

#[test]
fn error_lookup_is_stateless() {
    let hub = ItiCan::new(MockController::new(["CAN0"]));
    assert_eq!(hub.error_text(0), "success");
    assert_eq!(hub.error_text(NATIVE_TIMEOUT), "receive timeout");
    assert!(!hub.error_text(CODE_INVALID_CHANNEL_STATE).is_empty());
}

#[test]
fn concurrent_io_is_serialized() -> anyhow::Result<()> {
    let mock = MockController {
        io_delay: Some(Duration::from_millis(2)),
        ..MockController::new(["CAN0"]).with_inbox(frames(64))
    };
    let (hub, session) = open_session(mock)?;
    let session = Arc::new(session);

    let sender = {
        let session = Arc::clone(&session);
        std::thread::spawn(move || {
            for frame in frames(32) {
                session.send_frame(&frame, None).unwrap();
            }
        })
    };
    let receiver = {
        let session = Arc::clone(&session);
        std::thread::spawn(move || {
            for _ in 0..32 {
                session.receive_frame(Some(10)).unwrap();
            }
        })
    };
    let configurer = {
        let session = Arc::clone(&session);
        std::thread::spawn(move || {
            for _ in 0..8 {
                session.set_baud_rate(500_000).unwrap();
                session.apply_settings(SettingsScope::Temporary).unwrap();
            }
        })
    };

    sender.join().unwrap();
    receiver.join().unwrap();
    configurer.join().unwrap();

    assert!(!hub.controller().overlapped());
    assert_eq!(hub.controller().transmits(), 32);
    assert_eq!(hub.controller().receives(), 32);
    Ok(())
}

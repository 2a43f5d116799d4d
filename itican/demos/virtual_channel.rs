use itican_core::{CanMessage, OpenMode, OpenType, SettingsScope};
use itican_core::timing::{ArbitrationTiming, DataTiming};
use itican_rs::{ItiCan, VirtualController};

fn main() -> anyhow::Result<()> {
    let hub = ItiCan::new(VirtualController::default());
    println!("channels: {:?}", hub.find_all_channels()?);

    let tx = hub.get_channel("VCAN0")?;
    let rx = hub.get_channel("VCAN1")?;
    for session in [&tx, &rx] {
        session.set_custom_baud_rate(&ArbitrationTiming::new(4, 34, 5, 4))?;
        session.set_custom_fd_baud_rate(&DataTiming::new(2, 15, 4, 4, 16))?;
        session.apply_settings(SettingsScope::Temporary)?;
        session.open(OpenType::FD_CAN_BRS, OpenMode::Normal)?;
        println!("{}", session.custom_baud_rate()?);
    }

    let frames = (0..4u8)
        .map(|i| CanMessage::new(0x7E0 + i as u32, &[0x02, 0x10, i]))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow::anyhow!("invalid frame"))?;
    let (count, result) = tx.send_frames(&frames, None);
    println!("sent {} frame(s): {:?}", count, result);

    let (received, result) = rx.receive_frames(frames.len() + 1, Some(50));
    received.iter().for_each(|f| println!("{}", f));
    if let Err(e) = result {
        println!("{} ({})", e, hub.error_text(e.code()));
    }

    tx.close()?;
    rx.close()?;
    Ok(())
}

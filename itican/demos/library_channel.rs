use itican_core::Phase;
use itican_rs::{ChannelCfgContext, ItiCan, ItiCanLibrary};

fn main() -> anyhow::Result<()> {
    let cfg = ChannelCfgContext::new()?;
    let hub = ItiCan::with_codec(ItiCanLibrary::new()?, cfg.codec()?);

    let channels = hub.find_all_channels()?;
    println!("channels: {:?}", channels);

    let mut sessions = Vec::new();
    for name in cfg.channel_names() {
        if let Some(channel) = cfg.channel(name) {
            let session = hub.open_configured(name, channel)?;
            println!("{}: {}", name, session.decoded_timing(Phase::Arbitration)?);
            sessions.push(session);
        }
    }

    for session in &sessions {
        let (frames, result) = session.receive_frames(10, Some(100));
        frames.iter().for_each(|f| println!("{}", f));
        if let Err(e) = result {
            if !e.is_timeout() {
                println!("{}", hub.error_text(e.code()));
            }
        }
    }

    for session in sessions {
        session.close()?;
    }
    Ok(())
}

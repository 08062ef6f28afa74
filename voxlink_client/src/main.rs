use std::{
    fs::File,
    io::{self, BufWriter},
    thread,
    time::Duration,
};

use clap::Parser;
use voxlink_network::{AudioQueues, Client, Shutdown, worker::MessageHandler};
use voxlink_utils::signal::{Gain, NoiseGate};

mod capture;
mod playback;
mod settings;

use capture::ToneSource;
use playback::PlaybackSink;

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = settings::Args::parse();
    let settings = args.settings().map_err(io::Error::other)?;

    if args.dump_config {
        println!("{}", settings.to_toml().map_err(io::Error::other)?);
        return Ok(());
    }

    let config = &settings.client;
    let audio = &settings.audio;

    let out = audio
        .output
        .as_deref()
        .map(|path| File::create(path).map(BufWriter::new))
        .transpose()?;

    let queues = AudioQueues::new(config);

    let handler: Box<dyn MessageHandler> = Box::new(|text: &str| log::info!("server: {text}"));

    let client = Client::spawn(config, queues.audio_in, queues.audio_out, Some(handler))
        .map_err(io::Error::other)?;

    let shutdown = Shutdown::new();

    let source = ToneSource::new(queues.capture, audio.tone_hz, NoiseGate::new(audio.noise_gate));
    let sink = PlaybackSink::new(queues.playback, Gain::new(audio.gain), out);

    let capture = thread::Builder::new().name("capture".into()).spawn({
        let shutdown = shutdown.clone();
        move || source.run(&shutdown)
    })?;

    let playback = thread::Builder::new()
        .name("playback".into())
        .spawn(move || sink.run())?;

    match args.duration_secs {
        Some(secs) => thread::sleep(Duration::from_secs(secs)),
        None => loop {
            thread::park();
        },
    }

    log::info!("shutting down");

    shutdown.request();
    client.shutdown();

    capture
        .join()
        .map_err(|_| io::Error::other("capture thread panicked"))?;

    // the inbound worker is gone, so playback drains and returns
    playback
        .join()
        .map_err(|_| io::Error::other("playback thread panicked"))??;

    Ok(())
}

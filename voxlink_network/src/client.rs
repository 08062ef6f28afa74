use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use voxlink_utils::queue::{FrameRx, FrameTx, frame_queue};

use crate::{
    ClientConfig, Error, Negotiator, Shutdown,
    link::{Link, SupervisorState},
    supervisor::{AlwaysReady, NetworkReady, RetryPolicy, Supervisor},
    worker::{Inbound, MessageHandler, Outbound},
};

/// The two audio pipelines between the application and the network threads.
#[derive(Debug)]
pub struct AudioQueues {
    /// Capture side of the audio-in queue.
    pub capture: FrameTx,
    /// Network side of the audio-in queue.
    pub audio_in: FrameRx,
    /// Network side of the audio-out queue.
    pub audio_out: FrameTx,
    /// Playback side of the audio-out queue.
    pub playback: FrameRx,
}

impl AudioQueues {
    pub fn new(config: &ClientConfig) -> Self {
        let (capture, audio_in) = frame_queue(config.frame_size, config.audio_in_capacity);
        let (audio_out, playback) = frame_queue(config.frame_size, config.audio_out_capacity);

        Self {
            capture,
            audio_in,
            audio_out,
            playback,
        }
    }
}

/// A running client: the supervisor and both workers, each on its own thread.
#[derive(Debug)]
pub struct Client {
    link: Arc<Link>,
    threads: Vec<JoinHandle<()>>,
}

impl Client {
    /// Starts streaming `audio_in` to the server described by `config`, and the
    /// server's audio to `audio_out`.
    pub fn spawn(
        config: &ClientConfig,
        audio_in: FrameRx,
        audio_out: FrameTx,
        handler: Option<Box<dyn MessageHandler>>,
    ) -> Result<Self, Error> {
        Self::spawn_with_probe(config, audio_in, audio_out, handler, AlwaysReady)
    }

    pub fn spawn_with_probe(
        config: &ClientConfig,
        audio_in: FrameRx,
        audio_out: FrameTx,
        handler: Option<Box<dyn MessageHandler>>,
        probe: impl NetworkReady + Send + 'static,
    ) -> Result<Self, Error> {
        let uri = config.validate()?;

        for (name, len) in [
            ("audio-in", audio_in.frame_len()),
            ("audio-out", audio_out.frame_len()),
        ] {
            if len != config.frame_size {
                return Err(Error::InvalidConfig(format!(
                    "{name} frames are {len} bytes, expected {}",
                    config.frame_size
                )));
            }
        }

        log::info!("streaming to {uri}");

        let link = Arc::new(Link::new(Shutdown::new()));

        let supervisor = Supervisor::new(
            link.clone(),
            Negotiator::new(config),
            RetryPolicy::from_config(config),
        )
        .with_probe(probe);

        let outbound = Outbound::new(link.clone(), audio_in);

        let mut inbound = Inbound::new(
            link.clone(),
            audio_out,
            config.max_recv_payload.get(),
            config.playback_enqueue_timeout(),
        );
        inbound.handler = handler;

        let mut client = Self {
            link,
            threads: Vec::with_capacity(3),
        };

        let spawned = [
            spawn("voxlink-supervisor", move || supervisor.run()),
            spawn("voxlink-outbound", move || outbound.run()),
            spawn("voxlink-inbound", move || inbound.run()),
        ];

        for thread in spawned {
            match thread {
                Ok(thread) => client.threads.push(thread),
                Err(e) => {
                    client.shutdown();
                    return Err(e.into());
                }
            }
        }

        Ok(client)
    }

    #[inline(always)]
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    #[inline(always)]
    pub fn state(&self) -> SupervisorState {
        self.link.state()
    }

    /// Stops all threads, closing the current session if any, and waits for them.
    pub fn shutdown(mut self) {
        self.link.shutdown().request();

        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or_default().to_owned();

            if thread.join().is_err() {
                log::error!("{name} panicked");
            }
        }
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_owned()).spawn(f)
}

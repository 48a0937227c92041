//! Threaded driver for a [`StreamClient`].
//!
//! The client itself never blocks or sleeps. The runtime owns it on a
//! dedicated thread and feeds it, one at a time, transport events, consumer
//! commands and expired timers from a [`SystemTimer`]. Waiting for the next
//! input is a `recv_deadline` bounded by the earliest pending timer.

use crate::client::StreamClient;
use crate::config::StreamConfig;
use crate::connection::{SystemTimer, Transport, TransportEvent};
use crate::error::{Result, StreamError};
use crate::subscriptions::ListenerHandle;
use crate::types::{StreamStats, TopicId};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

enum Command {
    Transport(TransportEvent),
    AddTopics(Vec<TopicId>),
    RemoveTopics(Vec<TopicId>),
    Subscribe(Sender<ListenerHandle>),
    Stats(Sender<StreamStats>),
    Reset,
    Shutdown,
}

/// Where a transport reports what it observed. Cheap to clone and safe to
/// use from the transport's own reader thread.
#[derive(Clone)]
pub struct TransportSink {
    commands: Sender<Command>,
}

impl TransportSink {
    /// Returns false once the runtime has stopped.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.commands.send(Command::Transport(event)).is_ok()
    }
}

/// A [`StreamClient`] running on its own thread.
pub struct StreamRuntime {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl StreamRuntime {
    /// Build a client around the transport returned by `make_transport` and
    /// start it. The transport is handed the sink it must report to.
    pub fn spawn<F, T>(config: StreamConfig, make_transport: F) -> Result<Self>
    where
        F: FnOnce(TransportSink) -> T,
        T: Transport + 'static,
    {
        Self::spawn_with(config, make_transport, |client| client)
    }

    /// Like [`spawn`](Self::spawn), with a hook to finish building the client
    /// (e.g. to attach a snapshot source).
    pub fn spawn_with<F, T, C>(config: StreamConfig, make_transport: F, customize: C) -> Result<Self>
    where
        F: FnOnce(TransportSink) -> T,
        T: Transport + 'static,
        C: FnOnce(StreamClient) -> StreamClient,
    {
        let (commands, inbox) = unbounded();
        let transport = make_transport(TransportSink {
            commands: commands.clone(),
        });
        let timer = SystemTimer::new();
        let client = customize(StreamClient::new(
            config,
            Box::new(transport),
            Arc::new(timer.clone()),
        )?);

        let thread = thread::Builder::new()
            .name("agent-stream".to_string())
            .spawn(move || run(client, timer, inbox))
            .map_err(|e| StreamError::Connection(format!("failed to spawn runtime: {}", e)))?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    pub fn transport_sink(&self) -> TransportSink {
        TransportSink {
            commands: self.commands.clone(),
        }
    }

    pub fn add_topics<I, T>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<TopicId>,
    {
        self.send(Command::AddTopics(topics.into_iter().map(Into::into).collect()))
    }

    pub fn remove_topics<I, T>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<TopicId>,
    {
        self.send(Command::RemoveTopics(topics.into_iter().map(Into::into).collect()))
    }

    /// Register a listener on the running client.
    pub fn subscribe(&self) -> Result<ListenerHandle> {
        let (reply, response) = bounded(1);
        self.send(Command::Subscribe(reply))?;
        response.recv().map_err(|_| StreamError::Shutdown)
    }

    pub fn stats(&self) -> Result<StreamStats> {
        let (reply, response) = bounded(1);
        self.send(Command::Stats(reply))?;
        response.recv().map_err(|_| StreamError::Shutdown)
    }

    /// Clear both buckets.
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Shut the client down and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| StreamError::Shutdown)
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Shutdown);
            if thread.join().is_err() {
                warn!("runtime thread panicked");
            }
        }
    }
}

impl Drop for StreamRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut client: StreamClient, timer: SystemTimer, inbox: Receiver<Command>) {
    if let Err(e) = client.connect() {
        warn!(error = %e, "initial connect failed");
    }

    loop {
        while let Some((handle, kind)) = timer.pop_due() {
            client.on_timer(handle, kind);
        }

        let deadline = timer
            .until_next()
            .and_then(|wait| Instant::now().checked_add(wait));
        let command = match deadline {
            Some(deadline) => match inbox.recv_deadline(deadline) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match inbox.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Transport(event) => client.handle_transport_event(event),
            Command::AddTopics(topics) => client.add_topics(topics),
            Command::RemoveTopics(topics) => client.remove_topics(topics),
            Command::Subscribe(reply) => {
                let _ = reply.send(client.subscribe());
            }
            Command::Stats(reply) => {
                let _ = reply.send(client.stats());
            }
            Command::Reset => client.reset(),
            Command::Shutdown => break,
        }
    }

    client.shutdown();
    debug!("runtime stopped");
}

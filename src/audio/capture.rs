//! # Audio Capture Session
//!
//! Bridges a callback-driven audio driver to an async consumer.
//!
//! The driver calls [`ChunkSink::push`] from its own real-time thread. `push`
//! copies the samples and does a non-blocking `try_send` into a bounded
//! queue; when the consumer falls behind the chunk is dropped and a single
//! overflow notice is offered on the error channel. Nothing on the callback
//! path waits.
//!
//! ## Lifecycle:
//! - `start` / `stop` are idempotent and can be repeated
//! - `close` is one-shot: it stops the driver, releases it, and ends the stream
//! - every operation after `close` fails with [`CaptureError::Closed`]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// One driver callback worth of samples. Immutable once created.
pub type AudioChunk = Arc<[i16]>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture is closed")]
    Closed,

    #[error("audio buffer overflow, dropping chunk")]
    Overflow,

    #[error("capture {0} stream already taken")]
    AlreadyTaken(&'static str),

    #[error("audio device error: {0}")]
    Device(String),
}

/// Capture format and queue sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: u32,
    pub queue_chunks: usize,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_size: 1024,
            queue_chunks: 100,
        }
    }
}

/// Handle given to the driver. Cheap to clone, safe to call from any thread.
#[derive(Clone)]
pub struct ChunkSink {
    chunks: mpsc::Sender<AudioChunk>,
    errors: mpsc::Sender<CaptureError>,
}

impl ChunkSink {
    /// Hand one callback's samples to the consumer without blocking.
    pub fn push(&self, samples: &[i16]) {
        let chunk: AudioChunk = Arc::from(samples);
        match self.chunks.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.report(CaptureError::Overflow),
            // consumer went away; nothing left to deliver to
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Best-effort fault notification. Dropped if a previous one is still unread.
    pub fn report(&self, err: CaptureError) {
        let _ = self.errors.try_send(err);
    }
}

/// The piece that talks to the audio hardware.
///
/// `start` must arrange for `sink.push` to be called on the driver's own
/// thread; `stop` must stop those calls and drop every clone of the sink.
pub trait CaptureDriver: Send {
    fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError>;
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Release the device for good. Called once, after `stop`.
    fn close(&mut self) {}
}

struct Control {
    driver: Box<dyn CaptureDriver>,
    sink: Option<ChunkSink>,
    running: bool,
    closed: bool,
}

/// A capture device plus the queue that carries its chunks to one consumer.
pub struct CaptureSession {
    control: Mutex<Control>,
    chunks: Mutex<Option<mpsc::Receiver<AudioChunk>>>,
    errors: Mutex<Option<mpsc::Receiver<CaptureError>>>,
    params: CaptureParams,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CaptureSession {
    pub fn new(driver: Box<dyn CaptureDriver>, params: CaptureParams) -> Self {
        let (chunk_tx, chunk_rx) = mpsc::channel(params.queue_chunks.max(1));
        let (error_tx, error_rx) = mpsc::channel(1);

        Self {
            control: Mutex::new(Control {
                driver,
                sink: Some(ChunkSink {
                    chunks: chunk_tx,
                    errors: error_tx,
                }),
                running: false,
                closed: false,
            }),
            chunks: Mutex::new(Some(chunk_rx)),
            errors: Mutex::new(Some(error_rx)),
            params,
        }
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        let mut control = lock(&self.control);
        if control.closed {
            return Err(CaptureError::Closed);
        }
        if control.running {
            return Ok(());
        }

        let sink = control.sink.clone().ok_or(CaptureError::Closed)?;
        control.driver.start(sink)?;
        control.running = true;
        info!(
            sample_rate = self.params.sample_rate,
            frame_size = self.params.frame_size,
            "Audio capture started"
        );
        Ok(())
    }

    pub fn stop(&self) -> Result<(), CaptureError> {
        let mut control = lock(&self.control);
        if control.closed {
            return Err(CaptureError::Closed);
        }
        if !control.running {
            return Ok(());
        }
        control.driver.stop()?;
        control.running = false;
        info!("Audio capture stopped");
        Ok(())
    }

    /// Stop if needed and release everything. Later calls do nothing.
    pub fn close(&self) {
        let mut control = lock(&self.control);
        if control.closed {
            return;
        }
        if control.running {
            if let Err(err) = control.driver.stop() {
                warn!(error = %err, "Audio driver failed to stop during close");
            }
            control.running = false;
        }
        control.driver.close();
        // last sender gone: the consumer stream ends after draining
        control.sink = None;
        control.closed = true;
        debug!("Audio capture closed");
    }

    fn ensure_open(&self) -> Result<(), CaptureError> {
        if lock(&self.control).closed {
            return Err(CaptureError::Closed);
        }
        Ok(())
    }

    /// The chunk stream. Can be taken once; it is not restartable.
    pub fn stream(&self) -> Result<ReceiverStream<AudioChunk>, CaptureError> {
        self.ensure_open()?;
        lock(&self.chunks)
            .take()
            .map(ReceiverStream::new)
            .ok_or(CaptureError::AlreadyTaken("audio"))
    }

    /// Asynchronous faults (overflow, device errors). Can be taken once.
    pub fn errors(&self) -> Result<ReceiverStream<CaptureError>, CaptureError> {
        self.ensure_open()?;
        lock(&self.errors)
            .take()
            .map(ReceiverStream::new)
            .ok_or(CaptureError::AlreadyTaken("error"))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

//! Microphone driver built on CPAL.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated
//! `audio-capture` thread that builds it, plays it, and parks until told to
//! stop. CPAL's own callback thread calls into the [`ChunkSink`].

use super::capture::{CaptureDriver, CaptureError, CaptureParams, ChunkSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info};

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

pub struct CpalDriver {
    device_name: Option<String>,
    params: CaptureParams,
    worker: Option<Worker>,
}

impl CpalDriver {
    pub fn new(device_name: Option<String>, params: CaptureParams) -> Self {
        Self {
            device_name,
            params,
            worker: None,
        }
    }
}

fn find_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::Device(format!("failed to enumerate devices: {}", e)))?
            .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::Device(format!("input device not found: {}", wanted))),
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::Device("no default input device".to_string())),
    }
}

/// Average interleaved frames down to one channel.
fn downmix(data: &[i16], channels: usize) -> Vec<i16> {
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn build_stream(
    device: &cpal::Device,
    params: &CaptureParams,
    sink: &ChunkSink,
) -> Result<cpal::Stream, CaptureError> {
    let channels = usize::from(params.channels);
    let mut last_error = String::from("no stream configuration attempted");

    for buffer_size in [
        cpal::BufferSize::Fixed(params.frame_size),
        cpal::BufferSize::Default,
    ] {
        let config = cpal::StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size,
        };

        let data_sink = sink.clone();
        let err_sink = sink.clone();
        let attempt = device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if channels == 1 {
                    data_sink.push(data);
                } else {
                    data_sink.push(&downmix(data, channels));
                }
            },
            move |err| err_sink.report(CaptureError::Device(err.to_string())),
            None,
        );
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = err.to_string(),
        }

        // some devices only expose float samples
        let data_sink = sink.clone();
        let err_sink = sink.clone();
        let attempt = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let converted: Vec<i16> = data
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
                    .collect();
                if channels == 1 {
                    data_sink.push(&converted);
                } else {
                    data_sink.push(&downmix(&converted, channels));
                }
            },
            move |err| err_sink.report(CaptureError::Device(err.to_string())),
            None,
        );
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = err.to_string(),
        }
    }

    Err(CaptureError::Device(format!(
        "failed to open input stream: {}",
        last_error
    )))
}

impl CaptureDriver for CpalDriver {
    fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let params = self.params.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let opened = find_device(device_name.as_deref()).and_then(|device| {
                    if let Ok(name) = device.name() {
                        info!(device = %name, "Opening input device");
                    }
                    build_stream(&device, &params, &sink)
                });
                // the stream callbacks hold their own clones
                drop(sink);

                let stream = match opened {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Device(err.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // park until stop() or the driver is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Input stream released");
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn capture thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Device("capture thread exited".to_string())));
        if let Err(err) = ready {
            let _ = handle.join();
            return Err(err);
        }

        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            worker
                .handle
                .join()
                .map_err(|_| CaptureError::Device("capture thread panicked".to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_frames() {
        assert_eq!(downmix(&[100, 300, -50, 50], 2), vec![200, 0]);
        assert_eq!(downmix(&[i16::MAX, i16::MAX], 2), vec![i16::MAX]);
    }
}

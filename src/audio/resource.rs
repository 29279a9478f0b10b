use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::audio::graph::{no_constraint, volume_constraint, Edge, StreamType, TransformerGraph, TransformerType};
use crate::audio::stages::{MediaStream, StageSource, TypedStream, VolumeControl};
use crate::error::AudioError;

/// Paquete Opus de silencio estándar.
pub const SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Duración fija de un frame Opus con el tamaño de frame configurado.
pub const FRAME_DURATION_MS: u64 = 20;

/// Frames que caben en el buffer entre el hilo de bombeo y el lector.
const FRAME_BUFFER_FRAMES: usize = 64;

/// Opciones al crear un recurso de audio.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub input_type: Option<StreamType>,
    pub inline_volume: bool,
    pub silence_padding_frames: Option<usize>,
    pub seek_seconds: f64,
}

/// Entrada de un recurso: un localizador (URL/ruta, solo apto para el
/// transcodificador externo) o un stream ya abierto con su descriptor.
pub enum ResourceInput {
    Locator(String),
    Stream(TypedStream),
}

struct ResourceInner {
    frames: Receiver<Bytes>,
    edges: Vec<TransformerType>,
    volume: Option<VolumeControl>,
    silence_padding_frames: usize,
    // -1 = sin armar; se arma al observar el primer "no legible"
    silence_remaining: AtomicI64,
    playback_duration_ms: AtomicU64,
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    pump_done: Arc<AtomicBool>,
}

/// Recurso de audio reproducible: la cadena de etapas compuesta en una sola
/// unidad legible frame a frame.
///
/// La cadena se bombea desde un hilo dedicado (las etapas bloquean) hacia un
/// canal acotado; `read` nunca bloquea, igual que espera el transporte.
#[derive(Clone)]
pub struct AudioResource {
    inner: Arc<ResourceInner>,
}

impl AudioResource {
    fn wrap(
        edges: Vec<TransformerType>,
        mut chain: Box<dyn MediaStream>,
        volume: Option<VolumeControl>,
        silence_padding_frames: usize,
    ) -> Self {
        let (tx, rx): (Sender<Bytes>, Receiver<Bytes>) =
            crossbeam_channel::bounded(FRAME_BUFFER_FRAMES);
        let started = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let pump_done = Arc::new(AtomicBool::new(false));

        {
            let started = started.clone();
            let stopped = stopped.clone();
            let pump_done = pump_done.clone();
            std::thread::spawn(move || {
                loop {
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }
                    match chain.read_chunk() {
                        Ok(Some(frame)) => {
                            started.store(true, Ordering::Release);
                            if tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("⚠️ El pipeline de audio terminó con error: {e}");
                            break;
                        }
                    }
                }
                pump_done.store(true, Ordering::Release);
            });
        }

        Self {
            inner: Arc::new(ResourceInner {
                frames: rx,
                edges,
                volume,
                silence_padding_frames,
                silence_remaining: AtomicI64::new(-1),
                playback_duration_ms: AtomicU64::new(0),
                started,
                stopped,
                pump_done,
            }),
        }
    }

    /// Si este recurso se puede seguir leyendo.
    ///
    /// Cuando el stream real se agota, arma la cuenta atrás de silencio y se
    /// mantiene legible hasta consumirla: el transporte sigue tirando frames
    /// (de silencio) en vez de cortar en seco.
    pub fn readable(&self) -> bool {
        let silence = self.inner.silence_remaining.load(Ordering::Acquire);
        if silence == 0 {
            return false;
        }
        if self.exhausted() {
            if silence == -1 {
                self.inner
                    .silence_remaining
                    .store(self.inner.silence_padding_frames as i64, Ordering::Release);
            }
            return self.inner.silence_remaining.load(Ordering::Acquire) != 0;
        }
        true
    }

    /// Si este recurso ya terminó del todo (stream agotado o destruido, y la
    /// cuenta de silencio, si se armó, consumida).
    pub fn ended(&self) -> bool {
        self.exhausted() && self.inner.silence_remaining.load(Ordering::Acquire) <= 0
    }

    /// Intenta leer un paquete Opus. Un frame real incrementa la duración de
    /// reproducción; los frames de silencio no cuentan.
    pub fn read(&self) -> Option<Bytes> {
        let silence = self.inner.silence_remaining.load(Ordering::Acquire);
        if silence == 0 {
            return None;
        }
        if silence > 0 {
            self.inner.silence_remaining.fetch_sub(1, Ordering::AcqRel);
            return Some(Bytes::from_static(&SILENCE_FRAME));
        }

        match self.inner.frames.try_recv() {
            Ok(frame) => {
                if !frame.is_empty() {
                    self.inner
                        .playback_duration_ms
                        .fetch_add(FRAME_DURATION_MS, Ordering::AcqRel);
                }
                Some(frame)
            }
            Err(_) => None,
        }
    }

    /// Milisegundos de audio real ya leídos.
    pub fn playback_duration_ms(&self) -> u64 {
        self.inner.playback_duration_ms.load(Ordering::Acquire)
    }

    pub fn started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> Option<VolumeControl> {
        self.inner.volume.clone()
    }

    /// Aristas del pipeline que compone este recurso.
    #[allow(dead_code)]
    pub fn edges(&self) -> &[TransformerType] {
        &self.inner.edges
    }

    /// Destruye el recurso: detiene el bombeo y libera el proceso externo de
    /// transcodificación (las etapas matan a sus hijos al soltarse).
    pub fn destroy(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        // Vaciar el buffer desbloquea un bombeo parado en un canal lleno
        while self.inner.frames.try_recv().is_ok() {}
    }

    fn exhausted(&self) -> bool {
        if self.inner.stopped.load(Ordering::Acquire) {
            return true;
        }
        self.inner.pump_done.load(Ordering::Acquire) && self.inner.frames.is_empty()
    }
}

impl std::fmt::Debug for AudioResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioResource")
            .field("edges", &self.inner.edges)
            .field("playback_duration_ms", &self.playback_duration_ms())
            .field("started", &self.started())
            .field("ended", &self.ended())
            .finish()
    }
}

/// Crea un recurso de audio reproducible.
///
/// Si la entrada es un localizador, el tipo de entrada pasa a ser arbitrario y
/// ffmpeg hará la lectura. Si la entrada no está ya en el formato correcto se
/// monta un pipeline de transcodificadores y transformadores (ffmpeg, códecs
/// Opus, demuxers Ogg/WebM) hasta dejarla lista para reproducir.
pub fn create_audio_resource(
    graph: &TransformerGraph,
    input: ResourceInput,
    options: ResourceOptions,
) -> Result<AudioResource, AudioError> {
    let silence_padding_frames = options.silence_padding_frames.unwrap_or(5);

    let (input_type, has_volume) = match &input {
        // Los localizadores solo los puede leer ffmpeg
        ResourceInput::Locator(_) => (StreamType::Arbitrary, false),
        ResourceInput::Stream(typed) => (
            options.input_type.unwrap_or(typed.descriptor.stream_type),
            typed.descriptor.has_volume,
        ),
    };
    let needs_inline_volume = options.inline_volume && !has_volume;

    let constraint: &dyn Fn(&[&Edge]) -> bool = if needs_inline_volume {
        &volume_constraint
    } else {
        &no_constraint
    };
    let pipeline = graph
        .find_pipeline(input_type, constraint)
        .ok_or(AudioError::NoPipeline { from: input_type })?;

    if pipeline.is_empty() {
        return passthrough_resource(input, silence_padding_frames);
    }

    let mut source = match input {
        ResourceInput::Locator(locator) => StageSource::Locator(locator),
        ResourceInput::Stream(typed) => StageSource::Stream(typed.stream),
    };
    let mut volume = None;
    let mut kinds = Vec::with_capacity(pipeline.len());

    for edge in &pipeline {
        let stage = edge.build(source, options.seek_seconds)?;
        if edge.kind == TransformerType::InlineVolume {
            volume = stage.volume_control();
        }
        kinds.push(edge.kind);
        source = StageSource::Stream(stage);
    }

    let chain = match source {
        StageSource::Stream(chain) => chain,
        StageSource::Locator(locator) => return Err(AudioError::InvalidPipeline(locator)),
    };

    Ok(AudioResource::wrap(
        kinds,
        chain,
        volume,
        silence_padding_frames,
    ))
}

/// Entrada que ya está en el formato de reproducción: se envuelve tal cual.
/// Un localizador sin etapas no es legible (nadie abriría la URL/ruta).
fn passthrough_resource(
    input: ResourceInput,
    silence_padding_frames: usize,
) -> Result<AudioResource, AudioError> {
    match input {
        ResourceInput::Locator(locator) => Err(AudioError::InvalidPipeline(locator)),
        ResourceInput::Stream(typed) => Ok(AudioResource::wrap(
            Vec::new(),
            typed.stream,
            None,
            silence_padding_frames,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stages::{StreamDescriptor, RAW_FRAME_BYTES};
    use pretty_assertions::assert_eq;
    use std::io;
    use std::time::{Duration, Instant};

    struct FakeStream {
        chunks: std::collections::VecDeque<Bytes>,
    }

    impl FakeStream {
        fn opus_packets(count: usize) -> Box<dyn MediaStream> {
            let chunks = (0..count)
                .map(|i| Bytes::from(vec![i as u8; 4]))
                .collect::<Vec<_>>();
            Box::new(Self {
                chunks: chunks.into(),
            })
        }

        fn raw_zeroes(frames: usize) -> Box<dyn MediaStream> {
            let chunks = (0..frames)
                .map(|_| Bytes::from(vec![0u8; RAW_FRAME_BYTES]))
                .collect::<Vec<_>>();
            Box::new(Self {
                chunks: chunks.into(),
            })
        }
    }

    impl MediaStream for FakeStream {
        fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
            Ok(self.chunks.pop_front())
        }
    }

    /// Lee hasta agotar el recurso, separando frames reales de silencio.
    fn drain(resource: &AudioResource) -> (Vec<Bytes>, usize) {
        let mut real = Vec::new();
        let mut silence = 0;
        let deadline = Instant::now() + Duration::from_secs(5);

        while Instant::now() < deadline {
            if resource.readable() {
                match resource.read() {
                    Some(frame) if frame[..] == SILENCE_FRAME => silence += 1,
                    Some(frame) => real.push(frame),
                    // Buffer vacío a mitad del stream: reintenta
                    None => std::thread::sleep(Duration::from_millis(2)),
                }
            } else if resource.ended() {
                return (real, silence);
            } else {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        panic!("el recurso no terminó a tiempo");
    }

    fn wrap_opus(packets: usize, silence_padding: usize) -> AudioResource {
        let graph = TransformerGraph::new(false, "ffmpeg");
        create_audio_resource(
            &graph,
            ResourceInput::Stream(TypedStream::new(
                FakeStream::opus_packets(packets),
                StreamDescriptor::new(StreamType::Opus),
            )),
            ResourceOptions {
                silence_padding_frames: Some(silence_padding),
                ..Default::default()
            },
        )
        .expect("recurso directo")
    }

    #[test]
    fn opus_input_is_wrapped_without_pipeline() {
        let resource = wrap_opus(3, 5);
        assert_eq!(resource.edges(), &[]);
        assert!(resource.volume().is_none());
    }

    #[test]
    fn silence_padding_emits_exactly_n_frames() {
        let resource = wrap_opus(3, 5);
        let (real, silence) = drain(&resource);
        assert_eq!(real.len(), 3);
        assert_eq!(silence, 5);
        assert!(resource.ended());
        assert_eq!(resource.read(), None);
    }

    #[test]
    fn playback_duration_counts_only_real_frames() {
        let resource = wrap_opus(4, 3);
        let (real, silence) = drain(&resource);
        assert_eq!(real.len(), 4);
        assert_eq!(silence, 3);
        assert_eq!(resource.playback_duration_ms(), 4 * FRAME_DURATION_MS);
    }

    #[test]
    fn raw_input_builds_an_encoder_pipeline() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let resource = create_audio_resource(
            &graph,
            ResourceInput::Stream(TypedStream::new(
                FakeStream::raw_zeroes(2),
                StreamDescriptor::new(StreamType::Raw),
            )),
            ResourceOptions {
                silence_padding_frames: Some(2),
                ..Default::default()
            },
        )
        .expect("pipeline de codificación");

        assert_eq!(resource.edges(), &[TransformerType::OpusEncoder]);
        let (real, silence) = drain(&resource);
        assert_eq!(real.len(), 2);
        assert_eq!(silence, 2);
        assert_eq!(resource.playback_duration_ms(), 2 * FRAME_DURATION_MS);
    }

    #[test]
    fn inline_volume_request_exposes_a_control() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let resource = create_audio_resource(
            &graph,
            ResourceInput::Stream(TypedStream::new(
                FakeStream::raw_zeroes(1),
                StreamDescriptor::new(StreamType::Raw),
            )),
            ResourceOptions {
                inline_volume: true,
                silence_padding_frames: Some(1),
                ..Default::default()
            },
        )
        .expect("pipeline con volumen");

        assert_eq!(
            resource.edges(),
            &[TransformerType::InlineVolume, TransformerType::OpusEncoder]
        );
        let control = resource.volume().expect("control de volumen");
        control.set(0.75);
        assert!((control.get() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn stream_with_volume_capability_skips_the_volume_edge() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let resource = create_audio_resource(
            &graph,
            ResourceInput::Stream(TypedStream::new(
                FakeStream::raw_zeroes(1),
                StreamDescriptor::new(StreamType::Raw).with_volume(),
            )),
            ResourceOptions {
                inline_volume: true,
                silence_padding_frames: Some(1),
                ..Default::default()
            },
        )
        .expect("pipeline sin volumen extra");

        assert_eq!(resource.edges(), &[TransformerType::OpusEncoder]);
    }

    #[test]
    fn destroyed_resource_reports_ended() {
        let resource = wrap_opus(50, 5);
        resource.destroy();
        assert!(resource.ended());
    }

    #[test]
    fn locator_without_stages_is_rejected() {
        let err = passthrough_resource(ResourceInput::Locator("/tmp/track.opus".into()), 5)
            .unwrap_err();
        assert!(
            matches!(err, AudioError::InvalidPipeline(ref locator) if locator == "/tmp/track.opus")
        );
    }
}

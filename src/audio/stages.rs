use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::packet::Packet;
use audiopus::{Application, Channels, MutSignals, SampleRate};
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::{self, Read, Seek, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::default::formats::{MkvReader, OggReader};
use tracing::{debug, warn};

use crate::audio::graph::StreamType;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
pub const FRAME_SAMPLES: usize = 960; // 20ms a 48kHz
pub const RAW_FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;

const MAX_OPUS_PACKET: usize = 1500;
const RAW_CHUNK_BYTES: usize = 8 * 1024;

/// Una etapa de un pipeline de transcodificación. Lectura por demanda y
/// bloqueante: el hilo de bombeo del recurso es quien tira de la cadena.
///
/// Para etapas con tipo Opus un fragmento es exactamente un paquete Opus;
/// para etapas raw/arbitrary son bytes sin delimitar.
pub trait MediaStream: Send + Sync {
    /// Lee el siguiente fragmento; `None` señala el fin del stream.
    fn read_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// Control de volumen en línea, si esta etapa lo ofrece.
    fn volume_control(&self) -> Option<VolumeControl> {
        None
    }
}

/// Descriptor explícito adjunto a cada stream en su creación.
///
/// Sustituye a la introspección de tipos en tiempo de ejecución: la fuente
/// declara qué formato produce y si ya trae control de volumen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub stream_type: StreamType,
    pub has_volume: bool,
}

impl StreamDescriptor {
    pub fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            has_volume: false,
        }
    }

    pub fn with_volume(mut self) -> Self {
        self.has_volume = true;
        self
    }
}

/// Un stream etiquetado con su descriptor.
pub struct TypedStream {
    pub stream: Box<dyn MediaStream>,
    pub descriptor: StreamDescriptor,
}

impl TypedStream {
    pub fn new(stream: Box<dyn MediaStream>, descriptor: StreamDescriptor) -> Self {
        Self { stream, descriptor }
    }
}

/// Entrada de una etapa: o un localizador (solo lo entiende ffmpeg) o el
/// stream de la etapa anterior.
pub enum StageSource {
    Locator(String),
    Stream(Box<dyn MediaStream>),
}

/// Handle compartido para ajustar el volumen de una etapa en caliente.
#[derive(Debug, Clone)]
pub struct VolumeControl(Arc<AtomicU32>);

impl VolumeControl {
    pub fn new(initial: f32) -> Self {
        Self(Arc::new(AtomicU32::new(initial.to_bits())))
    }

    pub fn set(&self, volume: f32) {
        self.0.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Etapa de proceso externo (ffmpeg, yt-dlp): lee stdout del hijo y,
/// opcionalmente, alimenta stdin desde la etapa anterior en un hilo aparte.
pub struct ProcessStream {
    child: Child,
    stdout: ChildStdout,
}

impl ProcessStream {
    pub fn spawn(
        mut command: Command,
        stdin_from: Option<Box<dyn MediaStream>>,
    ) -> io::Result<Self> {
        command.stdout(Stdio::piped()).stderr(Stdio::null());
        command.stdin(if stdin_from.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("el proceso hijo no expone stdout"))?;

        if let Some(mut upstream) = stdin_from {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| io::Error::other("el proceso hijo no expone stdin"))?;

            // Copia upstream -> stdin; al soltar stdin el hijo ve EOF
            std::thread::spawn(move || loop {
                match upstream.read_chunk() {
                    Ok(Some(chunk)) => {
                        if stdin.write_all(&chunk).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("alimentador de stdin terminó con error: {e}");
                        break;
                    }
                }
            });
        }

        Ok(Self { child, stdout })
    }
}

impl MediaStream for ProcessStream {
    fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; RAW_CHUNK_BYTES];
        let n = self.stdout.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Codificador Opus: agrupa el PCM de entrada en frames de 20ms y emite un
/// paquete Opus por frame. Un frame parcial al final se descarta.
pub struct OpusEncoderStage {
    upstream: Box<dyn MediaStream>,
    // audiopus no es Sync; el mutex solo aporta la cota, no hay contención
    encoder: Mutex<OpusEncoder>,
    pending: Vec<u8>,
    done: bool,
}

impl OpusEncoderStage {
    pub fn new(upstream: Box<dyn MediaStream>) -> Result<Self, audiopus::Error> {
        let encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        Ok(Self {
            upstream,
            encoder: Mutex::new(encoder),
            pending: Vec::with_capacity(RAW_FRAME_BYTES * 2),
            done: false,
        })
    }
}

impl MediaStream for OpusEncoderStage {
    fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        while self.pending.len() < RAW_FRAME_BYTES && !self.done {
            match self.upstream.read_chunk()? {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None => self.done = true,
            }
        }

        if self.pending.len() < RAW_FRAME_BYTES {
            return Ok(None);
        }

        let frame: Vec<u8> = self.pending.drain(..RAW_FRAME_BYTES).collect();
        let pcm: Vec<i16> = frame
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        let mut packet = vec![0u8; MAX_OPUS_PACKET];
        let written = self
            .encoder
            .lock()
            .encode(&pcm[..], &mut packet[..])
            .map_err(codec_error)?;
        packet.truncate(written);

        Ok(Some(Bytes::from(packet)))
    }
}

/// Decodificador Opus: un paquete de entrada produce un frame PCM s16le.
pub struct OpusDecoderStage {
    upstream: Box<dyn MediaStream>,
    decoder: Mutex<OpusDecoder>,
}

impl OpusDecoderStage {
    pub fn new(upstream: Box<dyn MediaStream>) -> Result<Self, audiopus::Error> {
        let decoder = OpusDecoder::new(SampleRate::Hz48000, Channels::Stereo)?;
        Ok(Self {
            upstream,
            decoder: Mutex::new(decoder),
        })
    }
}

impl MediaStream for OpusDecoderStage {
    fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let packet = match self.upstream.read_chunk()? {
            Some(packet) => packet,
            None => return Ok(None),
        };

        let mut pcm = vec![0i16; FRAME_SAMPLES * CHANNELS];
        let samples_per_channel = self
            .decoder
            .lock()
            .decode(
                Some(Packet::try_from(&packet[..]).map_err(codec_error)?),
                MutSignals::try_from(&mut pcm[..]).map_err(codec_error)?,
                false,
            )
            .map_err(codec_error)?;
        pcm.truncate(samples_per_channel * CHANNELS);

        let mut out = Vec::with_capacity(pcm.len() * 2);
        for sample in pcm {
            out.extend_from_slice(&sample.to_le_bytes());
        }

        Ok(Some(Bytes::from(out)))
    }
}

/// Transformador de volumen en línea sobre PCM s16le.
pub struct VolumeStage {
    upstream: Box<dyn MediaStream>,
    control: VolumeControl,
    // byte suelto cuando un chunk corta una muestra por la mitad
    carry: Option<u8>,
}

impl VolumeStage {
    pub fn new(upstream: Box<dyn MediaStream>) -> Self {
        Self {
            upstream,
            control: VolumeControl::new(1.0),
            carry: None,
        }
    }
}

impl MediaStream for VolumeStage {
    fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let chunk = match self.upstream.read_chunk()? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };

        let mut data = Vec::with_capacity(chunk.len() + 1);
        if let Some(byte) = self.carry.take() {
            data.push(byte);
        }
        data.extend_from_slice(&chunk);
        if data.len() % 2 != 0 {
            self.carry = data.pop();
        }

        let volume = self.control.get();
        if (volume - 1.0).abs() > f32::EPSILON {
            for pair in data.chunks_exact_mut(2) {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                let scaled = (f32::from(sample) * volume)
                    .clamp(f32::from(i16::MIN), f32::from(i16::MAX))
                    as i16;
                pair.copy_from_slice(&scaled.to_le_bytes());
            }
        }

        Ok(Some(Bytes::from(data)))
    }

    fn volume_control(&self) -> Option<VolumeControl> {
        Some(self.control.clone())
    }
}

/// Demuxer genérico sobre un lector de contenedores de symphonia.
///
/// El lector se construye de forma perezosa en la primera lectura: montar el
/// contenedor consume cabeceras del upstream y eso no debe bloquear la
/// creación del recurso.
pub struct DemuxStage<R: FormatReader + Send> {
    inner: Mutex<DemuxInner<R>>,
}

enum DemuxInner<R> {
    Pending(Option<Box<dyn MediaStream>>),
    Ready { reader: R, track_id: u32 },
    Finished,
}

pub type OggDemuxStage = DemuxStage<OggReader>;
pub type WebmDemuxStage = DemuxStage<MkvReader>;

impl<R: FormatReader + Send> DemuxStage<R> {
    pub fn new(upstream: Box<dyn MediaStream>) -> Self {
        Self {
            inner: Mutex::new(DemuxInner::Pending(Some(upstream))),
        }
    }
}

impl<R: FormatReader + Send> MediaStream for DemuxStage<R> {
    fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let inner = self.inner.get_mut();
        loop {
            match inner {
                DemuxInner::Pending(upstream) => {
                    let upstream = match upstream.take() {
                        Some(upstream) => upstream,
                        None => {
                            *inner = DemuxInner::Finished;
                            return Ok(None);
                        }
                    };
                    let mss = MediaSourceStream::new(
                        Box::new(ChunkReader::new(upstream)),
                        Default::default(),
                    );
                    match R::try_new(mss, &FormatOptions::default()) {
                        Ok(reader) => {
                            let track_id = match reader.default_track() {
                                Some(track) => track.id,
                                None => {
                                    *inner = DemuxInner::Finished;
                                    return Err(io::Error::new(
                                        io::ErrorKind::InvalidData,
                                        "el contenedor no tiene pistas de audio",
                                    ));
                                }
                            };
                            *inner = DemuxInner::Ready { reader, track_id };
                        }
                        Err(e) => {
                            *inner = DemuxInner::Finished;
                            return Err(demux_error(e));
                        }
                    }
                }
                DemuxInner::Ready { reader, track_id } => match reader.next_packet() {
                    Ok(packet) if packet.track_id() == *track_id => {
                        return Ok(Some(Bytes::copy_from_slice(packet.buf())));
                    }
                    Ok(_) => continue,
                    Err(symphonia::core::errors::Error::IoError(e))
                        if e.kind() == io::ErrorKind::UnexpectedEof =>
                    {
                        *inner = DemuxInner::Finished;
                        return Ok(None);
                    }
                    Err(symphonia::core::errors::Error::ResetRequired) => {
                        *inner = DemuxInner::Finished;
                        return Ok(None);
                    }
                    Err(e) => {
                        *inner = DemuxInner::Finished;
                        return Err(demux_error(e));
                    }
                },
                DemuxInner::Finished => return Ok(None),
            }
        }
    }
}

/// Adaptador `Read` sobre una etapa, para los lectores de symphonia.
struct ChunkReader {
    upstream: Box<dyn MediaStream>,
    buffer: Bytes,
    done: bool,
}

impl ChunkReader {
    fn new(upstream: Box<dyn MediaStream>) -> Self {
        Self {
            upstream,
            buffer: Bytes::new(),
            done: false,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.buffer.is_empty() {
            if self.done {
                return Ok(0);
            }
            match self.upstream.read_chunk() {
                Ok(Some(chunk)) => self.buffer = chunk,
                Ok(None) => self.done = true,
                Err(e) => {
                    warn!("⚠️ upstream del demuxer terminó con error: {e}");
                    self.done = true;
                }
            }
        }

        let n = self.buffer.len().min(buf.len());
        buf[..n].copy_from_slice(&self.buffer.split_to(n));
        Ok(n)
    }
}

impl Seek for ChunkReader {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "los streams del pipeline no permiten seek",
        ))
    }
}

impl MediaSource for ChunkReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn codec_error(e: audiopus::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn demux_error(e: symphonia::core::errors::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

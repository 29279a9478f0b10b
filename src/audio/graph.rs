use std::collections::HashMap;
use std::process::Command;
use tracing::{info, warn};

use crate::audio::stages::{
    MediaStream, OggDemuxStage, OpusDecoderStage, OpusEncoderStage, ProcessStream, StageSource,
    VolumeStage, WebmDemuxStage,
};
use crate::error::AudioError;

/// Profundidad máxima de la búsqueda de caminos en el grafo.
pub const MAX_SEARCH_DEPTH: usize = 5;

const FFMPEG_PCM_ARGUMENTS: &[&str] = &[
    "-analyzeduration",
    "0", // Sin sondeo previo de ffmpeg
    "-loglevel",
    "0", // Sin logging
    "-f",
    "s16le", // A PCM 16-bit little-endian
    "-ar",
    "48000", // Muestreo a 48KHz
    "-ac",
    "2", // 2 canales (estéreo)
];

const FFMPEG_OPUS_ARGUMENTS: &[&str] = &[
    "-analyzeduration",
    "0", // Sin sondeo previo de ffmpeg
    "-loglevel",
    "0", // Sin logging
    "-acodec",
    "libopus", // Códec Opus
    "-f",
    "opus", // A formato Opus
    "-ar",
    "48000", // Muestreo a 48KHz
    "-ac",
    "2", // 2 canales (estéreo)
];

/// Tipo de stream dentro del grafo, p.ej. un stream Opus o audio raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Arbitrary,
    Raw,
    OggOpus,
    WebmOpus,
    Opus,
}

impl StreamType {
    pub const ALL: [StreamType; 5] = [
        StreamType::Arbitrary,
        StreamType::Raw,
        StreamType::OggOpus,
        StreamType::WebmOpus,
        StreamType::Opus,
    ];
}

/// Clase de conversión que realiza una arista.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformerType {
    FfmpegPcm,
    FfmpegOgg,
    OpusEncoder,
    OpusDecoder,
    OggOpusDemuxer,
    WebmOpusDemuxer,
    InlineVolume,
}

type StageBuilder =
    Box<dyn Fn(StageSource, f64) -> Result<Box<dyn MediaStream>, AudioError> + Send + Sync>;

/// Arista del grafo: una transformación concreta con su coste relativo y la
/// fábrica que instancia la etapa (con seek opcional en segundos).
pub struct Edge {
    pub kind: TransformerType,
    pub from: StreamType,
    pub to: StreamType,
    pub cost: f64,
    builder: StageBuilder,
}

impl Edge {
    pub fn build(
        &self,
        source: StageSource,
        seek_seconds: f64,
    ) -> Result<Box<dyn MediaStream>, AudioError> {
        (self.builder)(source, seek_seconds)
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

/// Nodo del grafo: un tipo de stream con sus aristas salientes.
#[derive(Debug)]
struct Node {
    edges: Vec<Edge>,
}

/// Grafo dirigido de transformaciones de streams.
///
/// Se construye una vez al arrancar (la única rama condicional es la
/// capacidad libopus del ffmpeg instalado) y es de solo lectura durante la
/// reproducción.
pub struct TransformerGraph {
    nodes: HashMap<StreamType, Node>,
}

impl TransformerGraph {
    pub fn new(ffmpeg_opus_capable: bool, ffmpeg_path: &str) -> Self {
        let mut graph = Self {
            nodes: StreamType::ALL
                .iter()
                .map(|ty| (*ty, Node { edges: Vec::new() }))
                .collect(),
        };

        graph.add_edge(Edge {
            kind: TransformerType::OpusEncoder,
            from: StreamType::Raw,
            to: StreamType::Opus,
            cost: 1.5,
            builder: Box::new(|source, _seek| {
                Ok(Box::new(OpusEncoderStage::new(expect_stream(source)?)?))
            }),
        });

        graph.add_edge(Edge {
            kind: TransformerType::OpusDecoder,
            from: StreamType::Opus,
            to: StreamType::Raw,
            cost: 1.5,
            builder: Box::new(|source, _seek| {
                Ok(Box::new(OpusDecoderStage::new(expect_stream(source)?)?))
            }),
        });

        graph.add_edge(Edge {
            kind: TransformerType::OggOpusDemuxer,
            from: StreamType::OggOpus,
            to: StreamType::Opus,
            cost: 1.0,
            builder: Box::new(|source, _seek| {
                Ok(Box::new(OggDemuxStage::new(expect_stream(source)?)))
            }),
        });

        graph.add_edge(Edge {
            kind: TransformerType::WebmOpusDemuxer,
            from: StreamType::WebmOpus,
            to: StreamType::Opus,
            cost: 1.0,
            builder: Box::new(|source, _seek| {
                Ok(Box::new(WebmDemuxStage::new(expect_stream(source)?)))
            }),
        });

        // Solo el transcodificador externo puede consumir localizadores
        for from in [StreamType::Arbitrary, StreamType::OggOpus, StreamType::WebmOpus] {
            graph.add_edge(ffmpeg_edge(
                TransformerType::FfmpegPcm,
                from,
                StreamType::Raw,
                ffmpeg_path,
                FFMPEG_PCM_ARGUMENTS,
            ));
        }

        graph.add_edge(Edge {
            kind: TransformerType::InlineVolume,
            from: StreamType::Raw,
            to: StreamType::Raw,
            cost: 0.5,
            builder: Box::new(|source, _seek| {
                Ok(Box::new(VolumeStage::new(expect_stream(source)?)))
            }),
        });

        if ffmpeg_opus_capable {
            // Ogg y WebM también, por si traen otro muestreo o son mono; hoy no
            // cambia nada, pero con detección de cabeceras Opus correcta
            // permitirá al motor de voz transcodificarlos igualmente.
            for from in [StreamType::Arbitrary, StreamType::OggOpus, StreamType::WebmOpus] {
                graph.add_edge(ffmpeg_edge(
                    TransformerType::FfmpegOgg,
                    from,
                    StreamType::OggOpus,
                    ffmpeg_path,
                    FFMPEG_OPUS_ARGUMENTS,
                ));
            }
        }

        graph
    }

    fn add_edge(&mut self, edge: Edge) {
        if let Some(node) = self.nodes.get_mut(&edge.from) {
            node.edges.push(edge);
        }
    }

    fn edges_from(&self, from: StreamType) -> &[Edge] {
        self.nodes
            .get(&from)
            .map(|node| node.edges.as_slice())
            .unwrap_or(&[])
    }

    /// Busca el pipeline de menor coste para convertir `from` en Opus.
    ///
    /// `Some(vec![])` significa que la entrada ya está en el formato destino;
    /// `None` que no existe camino dentro de la profundidad de búsqueda. La
    /// búsqueda es exhaustiva: el grafo es diminuto y así no dependemos de que
    /// los costes sean monótonos a lo largo de un camino.
    pub fn find_pipeline(
        &self,
        from: StreamType,
        constraint: &dyn Fn(&[&Edge]) -> bool,
    ) -> Option<Vec<&Edge>> {
        let mut prefix = Vec::new();
        self.search(from, MAX_SEARCH_DEPTH, &mut prefix, constraint)
            .map(|(_cost, path)| path)
    }

    fn search<'a>(
        &'a self,
        node: StreamType,
        depth: usize,
        prefix: &mut Vec<&'a Edge>,
        constraint: &dyn Fn(&[&Edge]) -> bool,
    ) -> Option<(f64, Vec<&'a Edge>)> {
        if node == StreamType::Opus && constraint(prefix) {
            return Some((0.0, Vec::new()));
        }
        if depth == 0 {
            return None;
        }

        let mut best: Option<(f64, Vec<&'a Edge>)> = None;
        for edge in self.edges_from(node) {
            prefix.push(edge);
            if let Some((sub_cost, sub_path)) = self.search(edge.to, depth - 1, prefix, constraint)
            {
                let cost = edge.cost + sub_cost;
                if best.as_ref().map_or(true, |(b, _)| cost < *b) {
                    let mut path = Vec::with_capacity(sub_path.len() + 1);
                    path.push(edge);
                    path.extend(sub_path);
                    best = Some((cost, path));
                }
            }
            prefix.pop();
        }
        best
    }
}

/// El camino debe contener al menos una etapa de volumen en línea.
pub fn volume_constraint(path: &[&Edge]) -> bool {
    path.iter()
        .any(|edge| edge.kind == TransformerType::InlineVolume)
}

pub fn no_constraint(_path: &[&Edge]) -> bool {
    true
}

fn ffmpeg_edge(
    kind: TransformerType,
    from: StreamType,
    to: StreamType,
    ffmpeg_path: &str,
    profile: &'static [&'static str],
) -> Edge {
    let ffmpeg_path = ffmpeg_path.to_string();
    Edge {
        kind,
        from,
        to,
        cost: 2.0,
        builder: Box::new(move |source, seek_seconds| {
            let mut command = Command::new(&ffmpeg_path);
            let stdin_from = match source {
                StageSource::Locator(locator) => {
                    command.arg("-i").arg(locator);
                    None
                }
                StageSource::Stream(upstream) => {
                    command.args(["-i", "-"]);
                    Some(upstream)
                }
            };
            command.args(profile);
            command.args(["-ss", &seek_seconds.to_string()]);
            command.arg("pipe:1");

            Ok(Box::new(ProcessStream::spawn(command, stdin_from)?))
        }),
    }
}

fn expect_stream(source: StageSource) -> Result<Box<dyn MediaStream>, AudioError> {
    match source {
        StageSource::Stream(stream) => Ok(stream),
        StageSource::Locator(locator) => Err(AudioError::InvalidPipeline(locator)),
    }
}

/// Comprueba si el ffmpeg instalado trae libopus para habilitar la rama de
/// transcodificación Opus directa del grafo.
pub fn detect_ffmpeg_opus(ffmpeg_path: &str) -> bool {
    let output = match Command::new(ffmpeg_path).arg("-version").output() {
        Ok(output) => output,
        Err(e) => {
            warn!("⚠️ No se pudo ejecutar '{ffmpeg_path} -version': {e}");
            return false;
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let capable = text.contains("--enable-libopus");
    if capable {
        info!("✅ ffmpeg con libopus detectado, transcodificación Opus directa habilitada");
    } else {
        info!("ℹ️ ffmpeg sin libopus, se usará el camino PCM");
    }
    capable
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(path: &[&Edge]) -> Vec<TransformerType> {
        path.iter().map(|edge| edge.kind).collect()
    }

    fn total_cost(path: &[&Edge]) -> f64 {
        path.iter().map(|edge| edge.cost).sum()
    }

    #[test]
    fn opus_input_needs_no_pipeline() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let path = graph.find_pipeline(StreamType::Opus, &no_constraint).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn raw_with_volume_takes_the_self_loop_first() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let path = graph
            .find_pipeline(StreamType::Raw, &volume_constraint)
            .unwrap();
        // El lazo de volumen (0.5) y después el codificador: el camino más
        // barato desde raw que satisface la restricción de volumen.
        assert_eq!(
            kinds(&path),
            vec![TransformerType::InlineVolume, TransformerType::OpusEncoder]
        );
        assert_eq!(path[0].cost, 0.5);
        assert_eq!(total_cost(&path), 2.0);
    }

    #[test]
    fn arbitrary_goes_through_ffmpeg_pcm_without_libopus() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let path = graph
            .find_pipeline(StreamType::Arbitrary, &no_constraint)
            .unwrap();
        assert_eq!(
            kinds(&path),
            vec![TransformerType::FfmpegPcm, TransformerType::OpusEncoder]
        );
        assert_eq!(total_cost(&path), 3.5);
    }

    #[test]
    fn arbitrary_prefers_ffmpeg_ogg_with_libopus() {
        let graph = TransformerGraph::new(true, "ffmpeg");
        let path = graph
            .find_pipeline(StreamType::Arbitrary, &no_constraint)
            .unwrap();
        assert_eq!(
            kinds(&path),
            vec![TransformerType::FfmpegOgg, TransformerType::OggOpusDemuxer]
        );
        assert_eq!(total_cost(&path), 3.0);
    }

    #[test]
    fn volume_constraint_forces_the_pcm_branch() {
        // Aunque libopus esté disponible, el camino Ogg no pasa por raw y no
        // puede satisfacer la restricción de volumen.
        let graph = TransformerGraph::new(true, "ffmpeg");
        let path = graph
            .find_pipeline(StreamType::Arbitrary, &volume_constraint)
            .unwrap();
        assert_eq!(
            kinds(&path),
            vec![
                TransformerType::FfmpegPcm,
                TransformerType::InlineVolume,
                TransformerType::OpusEncoder,
            ]
        );
        assert_eq!(total_cost(&path), 4.0);
    }

    #[test]
    fn webm_demuxes_directly_without_constraint() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let path = graph
            .find_pipeline(StreamType::WebmOpus, &no_constraint)
            .unwrap();
        assert_eq!(kinds(&path), vec![TransformerType::WebmOpusDemuxer]);
        assert_eq!(total_cost(&path), 1.0);
    }

    #[test]
    fn webm_with_volume_transcodes_through_pcm() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let path = graph
            .find_pipeline(StreamType::WebmOpus, &volume_constraint)
            .unwrap();
        // ffmpeg-pcm (2.0) + volumen (0.5) + codificador (1.5) = 4.0, más
        // barato que demux (1.0) + decodificador (1.5) + volumen + codificador.
        assert_eq!(
            kinds(&path),
            vec![
                TransformerType::FfmpegPcm,
                TransformerType::InlineVolume,
                TransformerType::OpusEncoder,
            ]
        );
        assert_eq!(total_cost(&path), 4.0);
    }

    #[test]
    fn opus_satisfies_volume_via_decode_reencode() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let path = graph
            .find_pipeline(StreamType::Opus, &volume_constraint)
            .unwrap();
        assert_eq!(
            kinds(&path),
            vec![
                TransformerType::OpusDecoder,
                TransformerType::InlineVolume,
                TransformerType::OpusEncoder,
            ]
        );
        assert_eq!(total_cost(&path), 3.5);
    }

    #[test]
    fn impossible_constraint_yields_no_pipeline() {
        let graph = TransformerGraph::new(false, "ffmpeg");
        let never = |_: &[&Edge]| false;
        assert!(graph.find_pipeline(StreamType::Raw, &never).is_none());
    }
}

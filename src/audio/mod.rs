//! # Audio Module
//!
//! Core playback pipeline: transcoding graph, resources and per-guild players.
//!
//! The flow for a single item is:
//!
//! 1. A source opens the media as a tagged stream (or hands over a locator
//!    for ffmpeg to open directly).
//! 2. [`graph::TransformerGraph`] picks the cheapest chain of transcoder
//!    stages that ends in raw opus packets.
//! 3. [`resource::create_audio_resource`] builds that chain and pumps it into
//!    a frame buffer behind a cheap-to-clone [`resource::AudioResource`].
//! 4. A [`player::MusicPlayer`] hands resources to the voice transport and
//!    drives queue transitions off its idle events.
//!
//! Everything here is transport-agnostic: the actual voice connection is
//! injected through the traits in [`crate::transport`].

pub mod graph;
pub mod playable;
pub mod player;
pub mod registry;
pub mod resource;
pub mod stages;

use std::sync::Arc;

use crate::audio::graph::TransformerGraph;
use crate::config::PlayerConfig;
use crate::sources::MediaDownloader;

/// Dependencias compartidas por todos los players.
pub struct AudioContext {
    pub graph: TransformerGraph,
    pub downloader: Arc<dyn MediaDownloader>,
    pub config: PlayerConfig,
}

impl AudioContext {
    pub fn new(
        graph: TransformerGraph,
        downloader: Arc<dyn MediaDownloader>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            graph,
            downloader,
            config,
        }
    }
}

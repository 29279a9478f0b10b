use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::player::MusicPlayer;
use crate::audio::AudioContext;
use crate::notify::Notifier;
use crate::transport::{VoiceConnector, VoicePlayer};

/// Registro de players activos, uno por guild.
///
/// El registro es el único dueño de los `Arc<MusicPlayer>`: retirarlos de
/// aquí suelta el transporte y la conexión de voz asociados.
pub struct PlayerRegistry {
    ctx: Arc<AudioContext>,
    connector: Arc<dyn VoiceConnector>,
    players: DashMap<GuildId, Arc<MusicPlayer>>,
}

impl PlayerRegistry {
    pub fn new(ctx: Arc<AudioContext>, connector: Arc<dyn VoiceConnector>) -> Self {
        Self {
            ctx,
            connector,
            players: DashMap::new(),
        }
    }

    /// Player existente para la guild, si lo hay.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<MusicPlayer>> {
        self.players.get(&guild_id).map(|entry| entry.clone())
    }

    /// Devuelve el player de la guild, conectándose al canal de voz si aún no
    /// existe.
    pub async fn get_or_create(
        &self,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        voice_channel_name: &str,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Arc<MusicPlayer>> {
        if let Some(player) = self.get(guild_id) {
            return Ok(player);
        }

        info!(
            "🎧 Conectando al canal de voz '{}' en guild {}",
            voice_channel_name, guild_id
        );
        let connection = self.connector.connect(guild_id, voice_channel_id).await?;
        let (playback, events) = VoicePlayer::spawn(connection.sink());

        let player = MusicPlayer::spawn(
            guild_id,
            voice_channel_name,
            Arc::clone(&self.ctx),
            Arc::new(playback),
            connection,
            notifier,
            events,
        );

        // Otra tarea pudo ganar la carrera; el mapa decide quién se queda
        let entry = self
            .players
            .entry(guild_id)
            .or_insert_with(|| Arc::clone(&player));
        Ok(entry.clone())
    }

    /// Retira el player de la guild, liberando sus recursos. `true` si existía.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        let Some((_, player)) = self.players.remove(&guild_id) else {
            return false;
        };
        debug!("Retirando el player de la guild {}", guild_id);
        player.teardown();
        player.disconnect().await;
        true
    }

    /// Número de guilds con un player activo.
    pub fn guild_count(&self) -> usize {
        self.players.len()
    }

    /// Guilds con player activo, para comandos de diagnóstico del anfitrión.
    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.players.iter().map(|entry| *entry.key()).collect()
    }
}

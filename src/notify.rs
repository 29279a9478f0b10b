use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::warn;

/// Payload de notificación que el núcleo entrega a la capa de mensajería.
///
/// El núcleo nunca construye objetos de mensaje específicos de la
/// plataforma; solo texto plano o un embed básico (título, color,
/// descripción). La capa de comandos decide cómo renderizarlos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Text(String),
    Embed {
        title: Option<String>,
        color: u32,
        description: String,
    },
}

impl Notice {
    pub fn text(message: impl Into<String>) -> Self {
        Self::Text(message.into())
    }

    pub fn embed(color: u32, description: impl Into<String>) -> Self {
        Self::Embed {
            title: None,
            color,
            description: description.into(),
        }
    }
}

/// Capacidad de respuesta aportada por la capa de comandos.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn reply(&self, notice: Notice) -> anyhow::Result<()>;
}

/// Contexto del usuario que originó una petición de reproducción.
#[derive(Clone)]
pub struct RequestContext {
    pub user_id: UserId,
    pub username: String,
    pub guild_id: GuildId,
    pub text_channel_id: ChannelId,
    notifier: Arc<dyn Notifier>,
}

impl RequestContext {
    pub fn new(
        user_id: UserId,
        username: impl Into<String>,
        guild_id: GuildId,
        text_channel_id: ChannelId,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            user_id,
            username: username.into(),
            guild_id,
            text_channel_id,
            notifier,
        }
    }

    /// Responde al usuario; los fallos de entrega se registran y se descartan.
    pub async fn reply(&self, notice: Notice) {
        if let Err(e) = self.notifier.reply(notice).await {
            warn!("⚠️ No se pudo entregar la respuesta al usuario: {e:?}");
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("guild_id", &self.guild_id)
            .field("text_channel_id", &self.text_channel_id)
            .finish_non_exhaustive()
    }
}

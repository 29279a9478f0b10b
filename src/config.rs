use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Multiplicador de volumen fijo aplicado a cada recurso; 100% produce clipping.
pub const VOLUME_MULTIPLIER: f32 = 0.75;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    // Reproducción
    pub idle_disconnect_secs: u64,
    pub silence_padding_frames: usize,

    // Transcodificador externo
    pub ffmpeg_path: String,

    // Comportamiento
    pub disallow_silent_mode: bool,
    pub log_songs: bool,

    // Colores de embeds para avisos
    pub embed_color_1: u32,
    pub embed_color_2: u32,
}

impl PlayerConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            idle_disconnect_secs: std::env::var("LEAVE_TIMEOUT_IN_SECONDS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()?,
            silence_padding_frames: std::env::var("SILENCE_PADDING_FRAMES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            disallow_silent_mode: std::env::var("DISALLOW_SILENT_MODE")
                .map(|v| v == "true")
                .unwrap_or(false),
            log_songs: std::env::var("LOG_SONGS_IN_CONSOLE")
                .map(|v| v != "false")
                .unwrap_or(true),
            embed_color_1: parse_color(std::env::var("EMBED_COLOR_1").ok(), 0x9f5cc4), // Lila
            embed_color_2: parse_color(std::env::var("EMBED_COLOR_2").ok(), 0x00bfff), // Celeste
        };

        config.validate()?;

        Ok(config)
    }

    /// Valida los valores de configuración antes de usarlos.
    pub fn validate(&self) -> Result<()> {
        if self.idle_disconnect_secs == 0 {
            anyhow::bail!("LEAVE_TIMEOUT_IN_SECONDS debe ser mayor que 0");
        }

        if self.silence_padding_frames == 0 {
            anyhow::bail!("SILENCE_PADDING_FRAMES debe ser mayor que 0");
        }

        if self.ffmpeg_path.trim().is_empty() {
            anyhow::bail!("FFMPEG_PATH no puede estar vacío");
        }

        Ok(())
    }
}

/// Valores por defecto según lo que consume el núcleo de reproducción.
impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            idle_disconnect_secs: 1800, // 30 minutos
            silence_padding_frames: 5,
            ffmpeg_path: "ffmpeg".to_string(),
            disallow_silent_mode: false,
            log_songs: true,
            embed_color_1: 0x9f5cc4,
            embed_color_2: 0x00bfff,
        }
    }
}

fn parse_color(var: Option<String>, default: u32) -> u32 {
    var.and_then(|v| {
        let v = v.trim_start_matches("0x");
        u32::from_str_radix(v, 16).ok()
    })
    .unwrap_or(default)
}

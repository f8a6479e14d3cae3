use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;

use haven_core::domain::events::TurnMessage;
use haven_core::navigation::generate_navigation_commands;

use crate::events::ProducedMessage;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("voice synthesis failed: {0}")]
    Voice(String),
}

/// Text-to-speech boundary. `Ok(None)` means the synthesizer chose not to speak.
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, agent: &str) -> Result<Option<Vec<u8>>, EnrichmentError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnrichmentFlags {
    pub voice: bool,
    pub navigation: bool,
}

/// Adds optional voice audio and navigation commands to produced messages.
/// Enrichment never fails a turn: errors are logged and the field stays empty.
#[derive(Clone, Default)]
pub struct MessageEnricher {
    voice: Option<Arc<dyn VoiceSynthesizer>>,
}

impl MessageEnricher {
    pub fn new(voice: Option<Arc<dyn VoiceSynthesizer>>) -> Self {
        Self { voice }
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice.is_some()
    }

    pub async fn enrich(&self, message: ProducedMessage, flags: EnrichmentFlags) -> TurnMessage {
        let mut enriched = TurnMessage::plain(message.content, message.agent);
        if message.signal {
            return enriched;
        }

        if flags.voice {
            enriched.audio_base64 = self.voice_for(&enriched.content, &enriched.agent).await;
        }
        if flags.navigation {
            enriched.navigation_commands =
                generate_navigation_commands(&enriched.content, &enriched.agent);
            if !enriched.navigation_commands.is_empty() {
                tracing::debug!(
                    event_name = "turn.enrichment.navigation",
                    agent = %enriched.agent,
                    commands = enriched.navigation_commands.len(),
                    "generated navigation commands"
                );
            }
        }

        enriched
    }

    async fn voice_for(&self, text: &str, agent: &str) -> Option<String> {
        let synthesizer = self.voice.as_ref()?;
        match synthesizer.synthesize(text, agent).await {
            Ok(Some(audio)) => Some(base64::engine::general_purpose::STANDARD.encode(audio)),
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.enrichment.voice_failed",
                    agent,
                    error = %error,
                    "voice synthesis failed, returning text only"
                );
                None
            }
        }
    }
}

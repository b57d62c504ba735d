//! Send and receive paths of a channel participant.
//!
//! Sending peeks the ratchet at the epoch in force at the local wall clock
//! and only learns whether that was right from the sequencer. A stale-epoch
//! rejection refreshes the generation and retries. Receiving peeks at the
//! declared epoch; committed ratchets move only with sequencer timestamps
//! (see [`KeyStore::advance_consensus_time`]).

use tracing::{debug, info, warn};
use vetkeys_core::{
    ChannelId, Environment, EpochKeyId, GenerationId, GenerationMetadata, Identity, KeyIssuance,
    LocalKeyCache, OutgoingMessage, SequencedMessage, Sequencer, ServiceError, Timestamp,
};
use vetkeys_crypto::{CryptoError, EpochCiphertext};

use crate::{error::KeyError, key_store::KeyStore};

/// Shown in place of a message that could not be decrypted.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "<decryption failed>";

/// Outcome of an accepted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    /// Sequencer timestamp of acceptance
    pub timestamp: Timestamp,
    /// Generation the message was encrypted under
    pub generation: GenerationId,
    /// Ratchet epoch the message was encrypted under
    pub epoch: u64,
}

/// A sequenced message after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Position in the channel log
    pub index: u64,
    /// Sequencer timestamp
    pub timestamp: Timestamp,
    /// Claimed sender
    pub sender: Identity,
    /// Plaintext, or why it could not be recovered
    pub plaintext: Result<Vec<u8>, KeyError>,
}

/// A participant's view of its channels.
pub struct Messenger<I, S, C, E> {
    keys: KeyStore<I, C, E>,
    sequencer: S,
}

impl<I, S, C, E> Clone for Messenger<I, S, C, E>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self { keys: self.keys.clone(), sequencer: self.sequencer.clone() }
    }
}

impl<I, S, C, E> Messenger<I, S, C, E>
where
    I: KeyIssuance,
    S: Sequencer,
    C: LocalKeyCache,
    E: Environment,
{
    /// Messenger over an existing key table.
    pub fn new(keys: KeyStore<I, C, E>, sequencer: S) -> Self {
        Self { keys, sequencer }
    }

    /// The underlying key table.
    pub fn keys(&self) -> &KeyStore<I, C, E> {
        &self.keys
    }

    /// Encrypt and submit `plaintext` to `channel` as the caller.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if the service does not know the channel
    /// - `SendFailed` once `send_retry_limit` resubmissions were rejected
    ///   as stale, or found the local clock still before the generation
    /// - any resolution error of the current generation's key
    pub async fn send(
        &self,
        channel: &ChannelId,
        message_id: u64,
        plaintext: &[u8],
    ) -> Result<SentMessage, KeyError> {
        let config = self.keys.config();
        let mut retries = 0u32;

        loop {
            let metadata = self.latest_generation(channel).await?;
            let key_id = EpochKeyId::new(channel.clone(), metadata.generation);
            self.keys.ensure_ready(&key_id).await?;

            let now = self.keys.env().wall_clock();
            let sender = self.keys.caller();
            let sealed = self.keys.encrypt_at_time(&key_id, now, sender, message_id, plaintext);
            let stale = match sealed {
                Ok(EpochCiphertext { epoch, ciphertext }) => {
                    let message = OutgoingMessage {
                        generation: metadata.generation,
                        epoch,
                        sender: sender.clone(),
                        message_id,
                        ciphertext,
                    };

                    match self.sequencer.submit(channel, message).await {
                        Ok(timestamp) => {
                            self.keys.advance_consensus_time(timestamp);
                            info!(key = %key_id, epoch, message_id, %timestamp, "message sent");
                            let generation = metadata.generation;
                            return Ok(SentMessage { timestamp, generation, epoch });
                        },
                        Err(err @ ServiceError::StaleEpoch { .. }) => err,
                        Err(err) => return Err(err.into()),
                    }
                },
                // Local clock still precedes the generation; epoch 0 is the
                // one the sequencer would take
                Err(KeyError::Crypto(CryptoError::InvalidTime { .. })) => {
                    ServiceError::StaleEpoch { generation: metadata.generation, expected: 0 }
                },
                Err(err) => return Err(err),
            };

            if retries >= config.send_retry_limit {
                warn!(key = %key_id, retries, error = %stale, "giving up on stale epoch");
                return Err(KeyError::SendFailed { attempts: retries + 1, last: stale });
            }
            retries += 1;
            debug!(key = %key_id, retries, error = %stale, "stale epoch, retrying");
            self.keys.env().sleep(config.send_retry_backoff).await;
        }
    }

    /// Decrypt one sequenced message of `channel`.
    ///
    /// The message timestamp feeds the consensus clock whether or not
    /// decryption succeeds.
    ///
    /// # Errors
    ///
    /// - `KeyTooOld` if the declared epoch is behind the committed ratchet
    /// - `Crypto(DecryptionFailed)` on authentication failure
    /// - any resolution error of the declared generation's key
    pub async fn decrypt(
        &self,
        channel: &ChannelId,
        sequenced: &SequencedMessage,
    ) -> Result<Vec<u8>, KeyError> {
        let message = &sequenced.message;
        let key_id = EpochKeyId::new(channel.clone(), message.generation);

        let result = match self.keys.ensure_ready(&key_id).await {
            Ok(()) => self.keys.decrypt(
                &key_id,
                message.epoch,
                &message.sender,
                message.message_id,
                &message.ciphertext,
            ),
            Err(err) => Err(err),
        };

        self.keys.advance_consensus_time(sequenced.timestamp);
        result
    }

    /// Like [`Self::decrypt`], but renders failures as a placeholder.
    pub async fn decrypt_for_display(
        &self,
        channel: &ChannelId,
        sequenced: &SequencedMessage,
    ) -> String {
        match self.decrypt(channel, sequenced).await {
            Ok(plaintext) => String::from_utf8_lossy(&plaintext).into_owned(),
            Err(err) => {
                warn!(
                    channel = %channel,
                    index = sequenced.index,
                    error = %err,
                    "failed to decrypt message"
                );
                DECRYPTION_FAILED_PLACEHOLDER.to_string()
            },
        }
    }

    /// Sequenced messages of `channel` from index `from` on.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if the sequencer does not know the channel
    pub async fn load_messages(
        &self,
        channel: &ChannelId,
        from: u64,
    ) -> Result<Vec<SequencedMessage>, KeyError> {
        match self.sequencer.messages(channel, from).await {
            Ok(messages) => Ok(messages),
            Err(ServiceError::NotFound) => {
                Err(KeyError::UnknownChannel { channel: channel.clone() })
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Load and decrypt messages of `channel` from index `from` on, in log
    /// order.
    ///
    /// Per-message failures are reported in place; only loading the log
    /// can fail as a whole.
    pub async fn receive(
        &self,
        channel: &ChannelId,
        from: u64,
    ) -> Result<Vec<ReceivedMessage>, KeyError> {
        let messages = self.load_messages(channel, from).await?;

        let mut received = Vec::with_capacity(messages.len());
        for sequenced in &messages {
            let plaintext = self.decrypt(channel, sequenced).await;
            received.push(ReceivedMessage {
                index: sequenced.index,
                timestamp: sequenced.timestamp,
                sender: sequenced.message.sender.clone(),
                plaintext,
            });
        }
        Ok(received)
    }

    async fn latest_generation(&self, channel: &ChannelId) -> Result<GenerationMetadata, KeyError> {
        match self.keys.issuance().latest_generation(channel).await {
            Ok(metadata) => Ok(metadata),
            Err(ServiceError::NotFound) => {
                Err(KeyError::UnknownChannel { channel: channel.clone() })
            },
            Err(err) => Err(err.into()),
        }
    }
}

//! Firmware update over BLE
//!
//! The device expects, in this order and each acknowledged before the next:
//! 1. the image length as decimal ASCII on the file-length characteristic
//! 2. `0x01` on the CRC-mode characteristic
//! 3. `0x04` on the command characteristic (enter update mode)
//! 4. the raw image on the firmware characteristic, in ascending chunks
//!
//! There is no resume. A failed or cancelled update leaves the device
//! waiting for more chunks and has to be restarted from step 1.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reptrap_proto::{CharacteristicRole, ble, chunk_count, file_length_payload};
use tracing::{debug, info, instrument, warn};

use crate::session::Endpoint;
use crate::{Error, FirmwareSource, GattLink, UpdateStep};

/// Progress of one update, reported to the caller as it happens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStage {
    Fetching,
    AnnouncingLength { total: usize },
    SelectingCrc,
    EnteringUpdateMode,
    Streaming { sent: usize, total: usize },
    Complete { total: usize },
}

impl UpdateStage {
    pub fn message(&self) -> String {
        match self {
            UpdateStage::Fetching => "Downloading firmware...".into(),
            UpdateStage::AnnouncingLength { total } => format!("Announcing image of {total} bytes..."),
            UpdateStage::SelectingCrc => "Enabling CRC check...".into(),
            UpdateStage::EnteringUpdateMode => "Switching device to update mode...".into(),
            UpdateStage::Streaming { sent, total } => {
                let percent = if *total == 0 { 100 } else { sent * 100 / total };
                format!("Uploading firmware... {percent}% ({sent}/{total})")
            }
            UpdateStage::Complete { total } => format!("Firmware sent ({total} bytes)"),
        }
    }
}

/// Stops an in-flight update before its next chunk
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cursor over one image: `0 <= offset <= total`, chunks never overlap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTransfer {
    offset: usize,
    chunk_size: usize,
    total: usize,
}

impl UpdateTransfer {
    pub fn new(total: usize, chunk_size: usize) -> Self {
        Self {
            offset: 0,
            chunk_size: chunk_size.max(1),
            total,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn chunk_count(&self) -> usize {
        chunk_count(self.total, self.chunk_size)
    }

    pub fn is_complete(&self) -> bool {
        self.offset >= self.total
    }

    /// The chunk at the current offset. The offset only moves on
    /// [`UpdateTransfer::advance`], after the write went through.
    pub fn peek<'a>(&self, image: &'a [u8]) -> Option<&'a [u8]> {
        if self.is_complete() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.total);
        image.get(self.offset..end)
    }

    pub fn advance(&mut self, written: usize) {
        self.offset = (self.offset + written).min(self.total);
    }
}

/// One firmware push
#[derive(Debug, Clone)]
pub struct FirmwareUpdate {
    chunk_size: usize,
    cancel: CancelHandle,
}

impl Default for FirmwareUpdate {
    fn default() -> Self {
        Self::new(ble::CHUNK_SIZE)
    }
}

impl FirmwareUpdate {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Fetch the image and stream it to the device. Returns the number of
    /// image bytes written.
    #[instrument(skip_all, fields(source = %source.describe(), chunk_size = self.chunk_size))]
    pub async fn run<L, S>(
        &self,
        endpoint: &Endpoint<'_, L>,
        source: &S,
        mut on_stage: impl FnMut(&UpdateStage),
    ) -> Result<usize, Error>
    where
        L: GattLink,
        S: FirmwareSource + ?Sized,
    {
        endpoint
            .require(&CharacteristicRole::REQUIRED_FOR_UPDATE)
            .map_err(|e| e.at(UpdateStep::Preflight))?;

        on_stage(&UpdateStage::Fetching);
        let image = source.fetch().await.map_err(|e| e.at(UpdateStep::Fetch))?;
        let image = image.as_bytes();
        let mut transfer = UpdateTransfer::new(image.len(), self.chunk_size);
        info!(
            bytes = transfer.total(),
            chunks = transfer.chunk_count(),
            "starting firmware update"
        );

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                sent: 0,
                total: transfer.total(),
            });
        }

        on_stage(&UpdateStage::AnnouncingLength {
            total: transfer.total(),
        });
        endpoint
            .write(CharacteristicRole::FileLength, &file_length_payload(transfer.total()))
            .await
            .map_err(|e| e.at(UpdateStep::AnnounceLength))?;

        on_stage(&UpdateStage::SelectingCrc);
        endpoint
            .write(CharacteristicRole::CrcMode, &[ble::CRC_ENABLED])
            .await
            .map_err(|e| e.at(UpdateStep::SelectCrc))?;

        on_stage(&UpdateStage::EnteringUpdateMode);
        endpoint
            .write(CharacteristicRole::Command, &[ble::commands::ENTER_UPDATE])
            .await
            .map_err(|e| e.at(UpdateStep::EnterUpdateMode))?;

        while let Some(chunk) = transfer.peek(image) {
            if self.cancel.is_cancelled() {
                warn!(
                    sent = transfer.offset(),
                    total = transfer.total(),
                    "update cancelled, device left in update mode"
                );
                return Err(Error::Cancelled {
                    sent: transfer.offset(),
                    total: transfer.total(),
                });
            }

            let offset = transfer.offset();
            endpoint
                .write(CharacteristicRole::FirmwareData, chunk)
                .await
                .map_err(|e| e.at(UpdateStep::StreamChunk { offset }))?;
            transfer.advance(chunk.len());
            debug!(offset, len = chunk.len(), "chunk written");

            on_stage(&UpdateStage::Streaming {
                sent: transfer.offset(),
                total: transfer.total(),
            });
        }

        info!(bytes = transfer.total(), "firmware update sent");
        on_stage(&UpdateStage::Complete {
            total: transfer.total(),
        });
        Ok(transfer.total())
    }
}

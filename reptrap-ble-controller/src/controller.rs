//! Front door for applications: one session, one error channel

use std::fmt::Display;

use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::error;

use crate::{
    CancelHandle, Central, ControllerConfig, Error, FirmwareSource, FirmwareUpdate,
    HttpFirmwareSource, Session, StatusView, UpdateStage, trigger,
};

/// Owns the session and reports every failed operation on one channel.
///
/// Each operation also returns its error; the channel is for a UI that
/// shows failures without tracking which call produced them.
///
/// At most one device operation runs at a time. A call made while another
/// is still writing fails with [`Error::Busy`] and writes nothing.
pub struct Controller<C: Central> {
    session: Session<C>,
    firmware_url: String,
    chunk_size: usize,
    errors: mpsc::UnboundedSender<String>,
    error_rx: Option<mpsc::UnboundedReceiver<String>>,
    operation: Mutex<()>,
}

impl<C: Central> Controller<C> {
    pub fn new(central: C, config: &ControllerConfig) -> Self {
        let (errors, error_rx) = mpsc::unbounded_channel();
        Self {
            session: Session::new(central, config.identity.clone(), config.session_settings()),
            firmware_url: config.firmware_url.clone(),
            chunk_size: config.chunk_size,
            errors,
            error_rx: Some(error_rx),
            operation: Mutex::new(()),
        }
    }

    /// The merged error stream. Only the first call gets it.
    pub fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.error_rx.take()
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn status(&self) -> StatusView {
        StatusView::new(self.session.subscribe())
    }

    /// Download source for the configured release URL
    pub fn default_source(&self) -> HttpFirmwareSource {
        HttpFirmwareSource::new(&self.firmware_url)
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        let result = self.session.connect().await;
        self.report("connect", result)
    }

    pub async fn trigger(&self) -> Result<(), Error> {
        let result = async {
            let _turn = self.begin()?;
            trigger::trigger(&self.session.endpoint()).await
        }
        .await;
        self.report("trigger", result)
    }

    pub async fn send_config(&self, value: u16) -> Result<(), Error> {
        let result = async {
            let _turn = self.begin()?;
            trigger::send_config(&self.session.endpoint(), value).await
        }
        .await;
        self.report("config", result)
    }

    pub async fn update_firmware<S>(
        &self,
        source: &S,
        cancel: CancelHandle,
        on_stage: impl FnMut(&UpdateStage),
    ) -> Result<usize, Error>
    where
        S: FirmwareSource + ?Sized,
    {
        let update = FirmwareUpdate::new(self.chunk_size).with_cancel(cancel);
        let result = async {
            let _turn = self.begin()?;
            update.run(&self.session.endpoint(), source, on_stage).await
        }
        .await;
        self.report("firmware update", result)
    }

    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    fn begin(&self) -> Result<MutexGuard<'_, ()>, Error> {
        self.operation.try_lock().map_err(|_| Error::Busy)
    }

    fn report<T>(&self, operation: impl Display, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            error!(%operation, error = %e, "operation failed");
            // Nobody listening is fine; the caller still gets the error
            let _ = self.errors.send(format!("{operation} failed: {e}"));
        }
        result
    }
}
